// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mutable per-client state: resolver identity, cached certificate, timeouts.

use std::time::Duration;

use dnscrypt_common::Certificate;
use tracing::debug;

use crate::config::ResolverConfig;

/// Default certificate-negotiation and per-query timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// A DNSCrypt session.
///
/// Owned by exactly one client; transports share it behind a lock. The
/// certificate is cached here until the resolver changes or the protocol
/// state machine resets.
#[derive(Debug)]
pub struct Session {
    pub resolver: ResolverConfig,
    /// Resolver certificate, populated by negotiation.
    pub certificate: Option<Certificate>,
    pub certificate_timeout: Duration,
    pub query_timeout: Duration,
}

impl Session {
    pub fn new(resolver: ResolverConfig) -> Self {
        Self {
            resolver,
            certificate: None,
            certificate_timeout: DEFAULT_TIMEOUT,
            query_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace the resolver wholesale and invalidate the cached certificate.
    ///
    /// Provider name and public key are always swapped together so a
    /// certificate from the old resolver can never validate against the new
    /// identity.
    pub fn set_resolver(&mut self, resolver: ResolverConfig) {
        debug!(address = %resolver.address, provider = %resolver.provider_name, "use resolver");

        self.resolver = resolver;
        self.certificate = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnscrypt_common::certificate::{CERT_MAGIC, ES_VERSION_XSALSA20};

    fn dummy_certificate() -> Certificate {
        Certificate {
            cert_magic: CERT_MAGIC,
            es_version: ES_VERSION_XSALSA20,
            min_protocol: 0,
            signature: [0u8; 64],
            resolver_pk: [0u8; 32],
            client_magic: [0u8; 8],
            serial: 1,
            ts_start: 0,
            ts_end: u32::MAX,
        }
    }

    #[test]
    fn set_resolver_invalidates_certificate() {
        let first = ResolverConfig::new("127.0.0.1:8443".parse().unwrap(), "one.example", [1u8; 32]);
        let second = ResolverConfig::new("127.0.0.2:8443".parse().unwrap(), "two.example", [2u8; 32]);

        let mut session = Session::new(first);
        session.certificate = Some(dummy_certificate());

        session.set_resolver(second.clone());

        assert!(session.certificate.is_none());
        assert_eq!(session.resolver, second);
    }
}
