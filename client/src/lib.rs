// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNSCrypt Client — encrypted DNS resolution over UDP with TCP fallback
//
// A lookup flows: facade → datagram transport (certificate negotiation on
// first use, then encrypted exchange) → answer filtering and shaping. A
// truncated UDP answer transparently retries the same query over the
// stream transport.

pub mod answers;
pub mod config;
pub mod lifecycle;
pub mod queue;
pub mod session;
pub mod transport;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dnscrypt_common::certificate::CertificateError;
use dnscrypt_common::crypto;
use hickory_proto::error::ProtoError;
use hickory_proto::op::Message;
use hickory_proto::rr::{DNSClass, Name, Record, RecordType};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub use answers::{MxRecord, NaptrRecord, RecordWithTtl, SoaRecord, SrvRecord};
pub use config::{ResolverConfig, DEFAULT_RESOLVER};
pub use session::{Session, DEFAULT_TIMEOUT};
pub use transport::{TcpTransport, UdpTransport};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The record type token is not a known type; rejected before any I/O.
    #[error("the value {0:?} is invalid for option rrtype")]
    InvalidRecordType(String),

    #[error("invalid resolver stamp: {0}")]
    InvalidStamp(String),

    /// The response held no answer matching the question.
    #[error("no data")]
    NoData,

    /// Per-query deadline exceeded. Terminal for the query; retry is the
    /// caller's decision.
    #[error("query timed out")]
    Timeout,

    #[error("transport closed")]
    Closed,

    #[error("missing certificate")]
    MissingCertificate,

    /// Both the datagram exchange and the stream fallback were truncated.
    #[error("truncated response")]
    TruncatedResponse,

    #[error("invalid DNS response: {0}")]
    BadResponse(String),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Crypto(#[from] crypto::Error),

    #[error("dns codec: {0}")]
    Proto(#[from] ProtoError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Client construction knobs. Explicit and strongly typed; the environment
/// override for the default resolver belongs to the surrounding CLI/config
/// layer, not here.
#[derive(Debug, Default, Clone)]
pub struct DnsCryptOptions {
    /// Target resolver; the compiled-in default stamp when absent.
    pub resolver: Option<ResolverConfig>,
    pub query_timeout: Option<Duration>,
    pub certificate_timeout: Option<Duration>,
}

/// A typed answer from [`DnsCrypt::resolve`].
#[derive(Debug, Clone)]
pub enum ResolveAnswer {
    A(Vec<Ipv4Addr>),
    Aaaa(Vec<Ipv6Addr>),
    Cname(Vec<String>),
    Mx(Vec<MxRecord>),
    Naptr(Vec<NaptrRecord>),
    Ns(Vec<String>),
    Ptr(Vec<String>),
    Soa(Vec<SoaRecord>),
    Srv(Vec<SrvRecord>),
    Txt(Vec<Vec<String>>),
    /// Raw records for types without a dedicated shape.
    Records(Vec<Record>),
}

/// DNSCrypt client.
pub struct DnsCrypt {
    session: Arc<Mutex<Session>>,
    udp: RwLock<Arc<UdpTransport>>,
    tcp: RwLock<Arc<TcpTransport>>,
}

impl DnsCrypt {
    /// Client against the default resolver.
    pub fn new() -> Result<Self, Error> {
        Self::with_options(DnsCryptOptions::default())
    }

    pub fn with_options(options: DnsCryptOptions) -> Result<Self, Error> {
        let resolver = match options.resolver {
            Some(resolver) => resolver,
            None => ResolverConfig::from_stamp(DEFAULT_RESOLVER)?,
        };

        let mut session = Session::new(resolver);
        if let Some(timeout) = options.query_timeout {
            session.query_timeout = timeout;
        }
        if let Some(timeout) = options.certificate_timeout {
            session.certificate_timeout = timeout;
        }

        let session = Arc::new(Mutex::new(session));

        Ok(Self {
            udp: RwLock::new(Arc::new(UdpTransport::new(Arc::clone(&session)))),
            tcp: RwLock::new(Arc::new(TcpTransport::new(Arc::clone(&session)))),
            session,
        })
    }

    /// The active resolver identity.
    pub async fn resolver(&self) -> ResolverConfig {
        self.session.lock().await.resolver.clone()
    }

    /// Switch resolver wholesale.
    ///
    /// Closes both transports (still-pending callers receive a terminal
    /// `Closed` error), invalidates the certificate, and reconnects lazily
    /// on the next lookup.
    pub async fn set_resolver(&self, resolver: ResolverConfig) -> Result<(), Error> {
        let mut udp = self.udp.write().await;
        let mut tcp = self.tcp.write().await;

        udp.close().await?;
        tcp.close().await?;

        self.session.lock().await.set_resolver(resolver);

        *udp = Arc::new(UdpTransport::new(Arc::clone(&self.session)));
        *tcp = Arc::new(TcpTransport::new(Arc::clone(&self.session)));
        Ok(())
    }

    /// Drop the cached certificate; the next lookup renegotiates.
    pub async fn forget_certificate(&self) -> Result<(), Error> {
        let udp = self.udp.read().await.clone();

        if udp.is_open() {
            udp.forget_certificate().await
        } else {
            self.session.lock().await.certificate = None;
            Ok(())
        }
    }

    /// Close the client. Outstanding callers receive `Closed` exactly once.
    pub async fn close(&self) -> Result<(), Error> {
        self.udp.read().await.close().await?;
        self.tcp.read().await.close().await?;
        Ok(())
    }

    /// Generic lookup: answers matching the queried name, type and class.
    pub async fn lookup(&self, hostname: &str, rrtype: &str) -> Result<Vec<Record>, Error> {
        let rrtype = parse_rrtype(rrtype)?;
        let name = parse_hostname(hostname)?;

        let response = self.lookup_message(&name, rrtype).await?;
        let answers = filter_answers(&response, &name, rrtype);

        if answers.is_empty() {
            return Err(Error::NoData);
        }

        Ok(answers)
    }

    /// Run the exchange over UDP, falling back to TCP on truncation.
    async fn lookup_message(&self, name: &Name, rrtype: RecordType) -> Result<Message, Error> {
        let response = self.udp().await.lookup(name.clone(), rrtype).await?;

        if !response.truncated() {
            return Ok(response);
        }

        debug!(name = %name, "truncated response, falling back to tcp");

        let response = self.tcp().await.lookup(name.clone(), rrtype).await?;

        if response.truncated() {
            return Err(Error::TruncatedResponse);
        }

        Ok(response)
    }

    /// The datagram transport, recreated if a previous one was closed.
    async fn udp(&self) -> Arc<UdpTransport> {
        {
            let udp = self.udp.read().await;
            if !udp.is_closed() {
                return Arc::clone(&udp);
            }
        }

        let mut udp = self.udp.write().await;
        if udp.is_closed() {
            *udp = Arc::new(UdpTransport::new(Arc::clone(&self.session)));
        }
        Arc::clone(&udp)
    }

    async fn tcp(&self) -> Arc<TcpTransport> {
        {
            let tcp = self.tcp.read().await;
            if !tcp.is_closed() {
                return Arc::clone(&tcp);
            }
        }

        let mut tcp = self.tcp.write().await;
        if tcp.is_closed() {
            *tcp = Arc::new(TcpTransport::new(Arc::clone(&self.session)));
        }
        Arc::clone(&tcp)
    }

    /// Resolve into the shape matching the record type.
    pub async fn resolve(&self, hostname: &str, rrtype: &str) -> Result<ResolveAnswer, Error> {
        match rrtype.to_ascii_uppercase().as_str() {
            "A" => Ok(ResolveAnswer::A(self.resolve4(hostname).await?)),
            "AAAA" => Ok(ResolveAnswer::Aaaa(self.resolve6(hostname).await?)),
            "CNAME" => Ok(ResolveAnswer::Cname(self.resolve_cname(hostname).await?)),
            "MX" => Ok(ResolveAnswer::Mx(self.resolve_mx(hostname).await?)),
            "NAPTR" => Ok(ResolveAnswer::Naptr(self.resolve_naptr(hostname).await?)),
            "NS" => Ok(ResolveAnswer::Ns(self.resolve_ns(hostname).await?)),
            "PTR" => Ok(ResolveAnswer::Ptr(self.resolve_ptr(hostname).await?)),
            "SOA" => Ok(ResolveAnswer::Soa(self.resolve_soa(hostname).await?)),
            "SRV" => Ok(ResolveAnswer::Srv(self.resolve_srv(hostname).await?)),
            "TXT" => Ok(ResolveAnswer::Txt(self.resolve_txt(hostname).await?)),
            other => Ok(ResolveAnswer::Records(self.lookup(hostname, other).await?)),
        }
    }

    pub async fn resolve4(&self, hostname: &str) -> Result<Vec<Ipv4Addr>, Error> {
        Ok(answers::to_ipv4(&self.lookup(hostname, "A").await?))
    }

    pub async fn resolve4_with_ttl(
        &self,
        hostname: &str,
    ) -> Result<Vec<RecordWithTtl<Ipv4Addr>>, Error> {
        Ok(answers::to_ipv4_with_ttl(&self.lookup(hostname, "A").await?))
    }

    pub async fn resolve6(&self, hostname: &str) -> Result<Vec<Ipv6Addr>, Error> {
        Ok(answers::to_ipv6(&self.lookup(hostname, "AAAA").await?))
    }

    pub async fn resolve6_with_ttl(
        &self,
        hostname: &str,
    ) -> Result<Vec<RecordWithTtl<Ipv6Addr>>, Error> {
        Ok(answers::to_ipv6_with_ttl(&self.lookup(hostname, "AAAA").await?))
    }

    pub async fn resolve_cname(&self, hostname: &str) -> Result<Vec<String>, Error> {
        Ok(answers::to_names(&self.lookup(hostname, "CNAME").await?))
    }

    pub async fn resolve_ns(&self, hostname: &str) -> Result<Vec<String>, Error> {
        Ok(answers::to_names(&self.lookup(hostname, "NS").await?))
    }

    pub async fn resolve_ptr(&self, hostname: &str) -> Result<Vec<String>, Error> {
        Ok(answers::to_names(&self.lookup(hostname, "PTR").await?))
    }

    pub async fn resolve_mx(&self, hostname: &str) -> Result<Vec<MxRecord>, Error> {
        Ok(answers::to_mx(&self.lookup(hostname, "MX").await?))
    }

    pub async fn resolve_naptr(&self, hostname: &str) -> Result<Vec<NaptrRecord>, Error> {
        Ok(answers::to_naptr(&self.lookup(hostname, "NAPTR").await?))
    }

    pub async fn resolve_soa(&self, hostname: &str) -> Result<Vec<SoaRecord>, Error> {
        Ok(answers::to_soa(&self.lookup(hostname, "SOA").await?))
    }

    pub async fn resolve_srv(&self, hostname: &str) -> Result<Vec<SrvRecord>, Error> {
        Ok(answers::to_srv(&self.lookup(hostname, "SRV").await?))
    }

    pub async fn resolve_txt(&self, hostname: &str) -> Result<Vec<Vec<String>>, Error> {
        Ok(answers::to_txt(&self.lookup(hostname, "TXT").await?))
    }
}

fn parse_rrtype(rrtype: &str) -> Result<RecordType, Error> {
    RecordType::from_str(&rrtype.to_ascii_uppercase())
        .map_err(|_| Error::InvalidRecordType(rrtype.to_string()))
}

fn parse_hostname(hostname: &str) -> Result<Name, Error> {
    let mut name = Name::from_utf8(hostname.to_ascii_lowercase())?;
    name.set_fqdn(true);
    Ok(name)
}

fn filter_answers(response: &Message, name: &Name, rrtype: RecordType) -> Vec<Record> {
    response
        .answers()
        .iter()
        .filter(|record| {
            record.record_type() == rrtype
                && record.name() == name
                && record.dns_class() == DNSClass::IN
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode};
    use hickory_proto::rr::rdata::{self, TXT};
    use hickory_proto::rr::RData;

    #[test]
    fn rrtype_tokens_are_case_insensitive() {
        assert_eq!(parse_rrtype("a").unwrap(), RecordType::A);
        assert_eq!(parse_rrtype("Mx").unwrap(), RecordType::MX);
        assert!(matches!(
            parse_rrtype("BOGUS"),
            Err(Error::InvalidRecordType(_))
        ));
    }

    #[test]
    fn hostnames_are_lowercased() {
        let name = parse_hostname("EXAMPLE.Com").unwrap();
        assert_eq!(name.to_utf8(), "example.com.");
    }

    #[test]
    fn filters_answers_by_question() {
        let name = parse_hostname("example.com").unwrap();
        let other = parse_hostname("other.example.com").unwrap();

        let mut response = Message::new();
        response
            .set_id(1)
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .add_answer(Record::from_rdata(
                name.clone(),
                300,
                RData::A(rdata::A(Ipv4Addr::new(192, 0, 2, 1))),
            ))
            .add_answer(Record::from_rdata(
                other,
                300,
                RData::A(rdata::A(Ipv4Addr::new(192, 0, 2, 2))),
            ))
            .add_answer(Record::from_rdata(
                name.clone(),
                300,
                RData::TXT(TXT::new(vec!["x".into()])),
            ));

        let matched = filter_answers(&response, &name, RecordType::A);

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name(), &name);
        assert_eq!(matched[0].record_type(), RecordType::A);
    }

    #[tokio::test]
    async fn invalid_rrtype_is_rejected_before_io() {
        let resolver =
            ResolverConfig::new("127.0.0.1:1".parse().unwrap(), "p.example", [0u8; 32]);
        let client = DnsCrypt::with_options(DnsCryptOptions {
            resolver: Some(resolver),
            ..Default::default()
        })
        .unwrap();

        let result = client.lookup("example.com", "BOGUS").await;
        assert!(matches!(result, Err(Error::InvalidRecordType(_))));
    }
}
