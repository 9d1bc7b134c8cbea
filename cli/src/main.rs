// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// dnscrypt — resolve a name through a DNSCrypt resolver
//
// The resolver is chosen, in order: --sdns flag, the DNSCRYPT_RESOLVER
// environment variable, the compiled-in default (quad9). The environment
// override is resolved here, never inside the client library.

use std::time::Duration;

use clap::Parser;
use dnscrypt_client::{DnsCrypt, DnsCryptOptions, ResolveAnswer, ResolverConfig, DEFAULT_RESOLVER};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "dnscrypt", about = "Resolve a name through a DNSCrypt resolver")]
struct Args {
    /// Hostname to resolve
    hostname: String,

    /// Resource record type (case-insensitive)
    #[arg(default_value = "A")]
    rrtype: String,

    /// Resolver stamp (sdns://…); overrides DNSCRYPT_RESOLVER and the default
    #[arg(long)]
    sdns: Option<String>,

    /// Per-query and certificate-negotiation timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout: u64,

    /// Print address record TTLs
    #[arg(long)]
    ttl: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let resolver = select_resolver(args.sdns.as_deref())?;
    info!(
        address = %resolver.address,
        provider = %resolver.provider_name,
        "using resolver"
    );

    let timeout = Duration::from_millis(args.timeout);
    let client = DnsCrypt::with_options(DnsCryptOptions {
        resolver: Some(resolver),
        query_timeout: Some(timeout),
        certificate_timeout: Some(timeout),
    })?;

    if args.ttl && args.rrtype.eq_ignore_ascii_case("A") {
        for record in client.resolve4_with_ttl(&args.hostname).await? {
            println!("{}\t{}", record.address, record.ttl);
        }
    } else if args.ttl && args.rrtype.eq_ignore_ascii_case("AAAA") {
        for record in client.resolve6_with_ttl(&args.hostname).await? {
            println!("{}\t{}", record.address, record.ttl);
        }
    } else {
        print_answer(client.resolve(&args.hostname, &args.rrtype).await?);
    }

    client.close().await?;
    Ok(())
}

/// Flag, then environment, then the default stamp. A malformed environment
/// value is reported and skipped rather than fatal.
fn select_resolver(flag: Option<&str>) -> anyhow::Result<ResolverConfig> {
    if let Some(sdns) = flag {
        return Ok(ResolverConfig::from_stamp(sdns)?);
    }

    if let Ok(sdns) = std::env::var("DNSCRYPT_RESOLVER") {
        match ResolverConfig::from_stamp(&sdns) {
            Ok(resolver) => {
                debug!("resolver set from environment");
                return Ok(resolver);
            }
            Err(error) => {
                warn!(error = %error, "ignoring unparsable DNSCRYPT_RESOLVER");
            }
        }
    }

    Ok(ResolverConfig::from_stamp(DEFAULT_RESOLVER)?)
}

fn print_answer(answer: ResolveAnswer) {
    match answer {
        ResolveAnswer::A(addresses) => {
            for address in addresses {
                println!("{address}");
            }
        }
        ResolveAnswer::Aaaa(addresses) => {
            for address in addresses {
                println!("{address}");
            }
        }
        ResolveAnswer::Cname(names) | ResolveAnswer::Ns(names) | ResolveAnswer::Ptr(names) => {
            for name in names {
                println!("{name}");
            }
        }
        ResolveAnswer::Mx(records) => {
            for mx in records {
                println!("{}\t{}", mx.priority, mx.exchange);
            }
        }
        ResolveAnswer::Naptr(records) => {
            for naptr in records {
                println!(
                    "{}\t{}\t{:?}\t{:?}\t{:?}\t{}",
                    naptr.order,
                    naptr.preference,
                    naptr.flags,
                    naptr.service,
                    naptr.regexp,
                    naptr.replacement
                );
            }
        }
        ResolveAnswer::Soa(records) => {
            for soa in records {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    soa.nsname,
                    soa.hostmaster,
                    soa.serial,
                    soa.refresh,
                    soa.retry,
                    soa.expire,
                    soa.minttl
                );
            }
        }
        ResolveAnswer::Srv(records) => {
            for srv in records {
                println!("{}\t{}\t{}\t{}", srv.priority, srv.weight, srv.port, srv.name);
            }
        }
        ResolveAnswer::Txt(records) => {
            for chunks in records {
                println!("{:?}", chunks.join(""));
            }
        }
        ResolveAnswer::Records(records) => {
            for record in records {
                println!("{record}");
            }
        }
    }
}
