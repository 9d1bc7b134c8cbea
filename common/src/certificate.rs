// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNSCrypt resolver certificate: parsing, validation, selection.
//
// Wire format (big-endian, 124 bytes total):
//   [4 bytes:  cert-magic <0x44 0x4e 0x53 0x43>]
//   [2 bytes:  es-version (cryptographic construction)]
//   [2 bytes:  min-protocol]
//   [64 bytes: Ed25519 signature by the provider secret key]
//   [32 bytes: resolver short-term public key]
//   [8 bytes:  client-magic (first 8 bytes of a client query)]
//   [4 bytes:  serial]
//   [4 bytes:  ts-start (unix seconds, inclusive)]
//   [4 bytes:  ts-end   (unix seconds, inclusive)]
//
// The signature covers everything after itself:
//   resolver-pk || client-magic || serial || ts-start || ts-end

use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::debug;

/// Certificate magic number, `DNSC` in ASCII.
pub const CERT_MAGIC: u32 = 0x444e_5343;
/// The only supported cryptographic construction: X25519-XSalsa20Poly1305.
pub const ES_VERSION_XSALSA20: u16 = 1;
/// Encoded certificate size (bytes).
pub const CERT_LEN: usize = 124;
/// Offset of the signed portion: skips magic, es-version, min-protocol
/// and the signature itself.
pub const SIGNED_OFFSET: usize = 4 + 2 + 2 + 64;

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("no valid certificates")]
    NoValidCertificates,
}

/// A parsed resolver certificate.
///
/// Holds the resolver's short-term encryption key material. Produced by
/// validating signed TXT records; among several valid certificates the one
/// with the highest serial wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub cert_magic: u32,
    pub es_version: u16,
    pub min_protocol: u16,
    pub signature: [u8; 64],
    pub resolver_pk: [u8; 32],
    pub client_magic: [u8; 8],
    pub serial: u32,
    pub ts_start: u32,
    pub ts_end: u32,
}

impl Certificate {
    /// Parse an encoded certificate.
    ///
    /// Returns `None` on malformed input; certificates arrive in untrusted
    /// TXT records, so a garbage candidate is discarded, not an error.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < CERT_LEN {
            debug!(len = bytes.len(), "certificate too short");
            return None;
        }

        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[8..72]);
        let mut resolver_pk = [0u8; 32];
        resolver_pk.copy_from_slice(&bytes[72..104]);
        let mut client_magic = [0u8; 8];
        client_magic.copy_from_slice(&bytes[104..112]);

        Some(Self {
            cert_magic: u32::from_be_bytes(bytes[0..4].try_into().ok()?),
            es_version: u16::from_be_bytes(bytes[4..6].try_into().ok()?),
            min_protocol: u16::from_be_bytes(bytes[6..8].try_into().ok()?),
            signature,
            resolver_pk,
            client_magic,
            serial: u32::from_be_bytes(bytes[112..116].try_into().ok()?),
            ts_start: u32::from_be_bytes(bytes[116..120].try_into().ok()?),
            ts_end: u32::from_be_bytes(bytes[120..124].try_into().ok()?),
        })
    }

    /// Serialize to the 124-byte wire layout.
    pub fn to_bytes(&self) -> [u8; CERT_LEN] {
        let mut bytes = [0u8; CERT_LEN];
        bytes[0..4].copy_from_slice(&self.cert_magic.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.es_version.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.min_protocol.to_be_bytes());
        bytes[8..72].copy_from_slice(&self.signature);
        bytes[72..104].copy_from_slice(&self.resolver_pk);
        bytes[104..112].copy_from_slice(&self.client_magic);
        bytes[112..116].copy_from_slice(&self.serial.to_be_bytes());
        bytes[116..120].copy_from_slice(&self.ts_start.to_be_bytes());
        bytes[120..124].copy_from_slice(&self.ts_end.to_be_bytes());
        bytes
    }
}

/// Current unix time in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Validate a certificate against the provider public key.
///
/// `signed` is the signed portion of the original encoding (bytes
/// `SIGNED_OFFSET..`, see the wire format above). Checks, in order: magic,
/// min-protocol, cryptographic construction, client-magic binding to the
/// resolver key, validity window against the live clock, and the Ed25519
/// signature.
pub fn validate(certificate: &Certificate, signed: &[u8], public_key: &[u8; 32]) -> bool {
    if certificate.cert_magic != CERT_MAGIC {
        return false;
    }

    if certificate.min_protocol != 0 {
        return false;
    }

    if certificate.es_version != ES_VERSION_XSALSA20 {
        return false;
    }

    // The client-magic is the first 8 bytes of the resolver short-term key.
    if certificate.client_magic != certificate.resolver_pk[..8] {
        return false;
    }

    let tsnow = unix_now();

    if !(u64::from(certificate.ts_start) <= tsnow && u64::from(certificate.ts_end) >= tsnow) {
        return false;
    }

    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(&certificate.signature);

    verifying_key.verify(signed, &signature).is_ok()
}

/// Reduce candidate certificate buffers to the newest valid certificate.
///
/// Parses every candidate, discards parse and validation failures, and keeps
/// the certificate with the highest serial.
pub fn select_certificate<B: AsRef<[u8]>>(
    candidates: &[B],
    public_key: &[u8; 32],
) -> Result<Certificate, CertificateError> {
    let mut selected: Option<Certificate> = None;

    for bytes in candidates {
        let bytes = bytes.as_ref();

        let Some(certificate) = Certificate::parse(bytes) else {
            continue;
        };

        if !validate(&certificate, &bytes[SIGNED_OFFSET..], public_key) {
            debug!(serial = certificate.serial, "discarding invalid certificate");
            continue;
        }

        match selected {
            Some(ref previous) if previous.serial >= certificate.serial => {}
            _ => selected = Some(certificate),
        }
    }

    selected.ok_or(CertificateError::NoValidCertificates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn signed_certificate(serial: u32) -> (Vec<u8>, [u8; 32]) {
        let provider = SigningKey::generate(&mut OsRng);

        let resolver_sk = crypto_box::SecretKey::generate(&mut OsRng);
        let resolver_pk = *resolver_sk.public_key().as_bytes();
        let mut client_magic = [0u8; 8];
        client_magic.copy_from_slice(&resolver_pk[..8]);

        let now = unix_now();
        let mut certificate = Certificate {
            cert_magic: CERT_MAGIC,
            es_version: ES_VERSION_XSALSA20,
            min_protocol: 0,
            signature: [0u8; 64],
            resolver_pk,
            client_magic,
            serial,
            ts_start: (now - 60) as u32,
            ts_end: (now + 3600) as u32,
        };

        let unsigned = certificate.to_bytes();
        let signature = provider.sign(&unsigned[SIGNED_OFFSET..]);
        certificate.signature = signature.to_bytes();

        (
            certificate.to_bytes().to_vec(),
            provider.verifying_key().to_bytes(),
        )
    }

    #[test]
    fn parse_roundtrip() {
        let (bytes, _) = signed_certificate(7);
        let certificate = Certificate::parse(&bytes).unwrap();

        assert_eq!(certificate.cert_magic, CERT_MAGIC);
        assert_eq!(certificate.es_version, ES_VERSION_XSALSA20);
        assert_eq!(certificate.min_protocol, 0);
        assert_eq!(certificate.serial, 7);
        assert_eq!(certificate.to_bytes().to_vec(), bytes);
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(Certificate::parse(&[0u8; 10]).is_none());
        assert!(Certificate::parse(&[]).is_none());
    }

    #[test]
    fn validates_signed_certificate() {
        let (bytes, public_key) = signed_certificate(1);
        let certificate = Certificate::parse(&bytes).unwrap();

        assert!(validate(&certificate, &bytes[SIGNED_OFFSET..], &public_key));
    }

    #[test]
    fn rejects_wrong_magic() {
        let (bytes, public_key) = signed_certificate(1);
        let mut certificate = Certificate::parse(&bytes).unwrap();
        certificate.cert_magic += 1;

        assert!(!validate(&certificate, &bytes[SIGNED_OFFSET..], &public_key));
    }

    #[test]
    fn rejects_wrong_es_version() {
        let (bytes, public_key) = signed_certificate(1);
        let mut certificate = Certificate::parse(&bytes).unwrap();
        certificate.es_version = 2;

        assert!(!validate(&certificate, &bytes[SIGNED_OFFSET..], &public_key));
    }

    #[test]
    fn rejects_wrong_min_protocol() {
        let (bytes, public_key) = signed_certificate(1);
        let mut certificate = Certificate::parse(&bytes).unwrap();
        certificate.min_protocol = 1;

        assert!(!validate(&certificate, &bytes[SIGNED_OFFSET..], &public_key));
    }

    #[test]
    fn rejects_client_magic_mismatch() {
        let (bytes, public_key) = signed_certificate(1);
        let mut certificate = Certificate::parse(&bytes).unwrap();
        certificate.client_magic[0] ^= 0xff;

        assert!(!validate(&certificate, &bytes[SIGNED_OFFSET..], &public_key));
    }

    #[test]
    fn rejects_expired_certificate() {
        let (bytes, public_key) = signed_certificate(1);
        let mut certificate = Certificate::parse(&bytes).unwrap();

        // One second in the past, everything else intact.
        certificate.ts_end = (unix_now() - 1) as u32;

        assert!(!validate(&certificate, &bytes[SIGNED_OFFSET..], &public_key));
    }

    #[test]
    fn rejects_tampered_signed_portion() {
        let (mut bytes, public_key) = signed_certificate(1);
        bytes[CERT_LEN - 10] ^= 0x01;
        let certificate = Certificate::parse(&bytes).unwrap();

        assert!(!validate(&certificate, &bytes[SIGNED_OFFSET..], &public_key));
    }

    #[test]
    fn rejects_wrong_provider_key() {
        let (bytes, _) = signed_certificate(1);
        let (_, other_key) = signed_certificate(2);
        let certificate = Certificate::parse(&bytes).unwrap();

        assert!(!validate(&certificate, &bytes[SIGNED_OFFSET..], &other_key));
    }

    #[test]
    fn selects_highest_serial() {
        let provider = SigningKey::generate(&mut OsRng);
        let public_key = provider.verifying_key().to_bytes();

        let resolver_sk = crypto_box::SecretKey::generate(&mut OsRng);
        let resolver_pk = *resolver_sk.public_key().as_bytes();
        let mut client_magic = [0u8; 8];
        client_magic.copy_from_slice(&resolver_pk[..8]);

        let now = unix_now();
        let sign = |serial: u32| {
            let mut certificate = Certificate {
                cert_magic: CERT_MAGIC,
                es_version: ES_VERSION_XSALSA20,
                min_protocol: 0,
                signature: [0u8; 64],
                resolver_pk,
                client_magic,
                serial,
                ts_start: (now - 60) as u32,
                ts_end: (now + 3600) as u32,
            };
            let unsigned = certificate.to_bytes();
            certificate.signature = provider.sign(&unsigned[SIGNED_OFFSET..]).to_bytes();
            certificate.to_bytes().to_vec()
        };

        let candidates = vec![sign(3), sign(9), sign(5), vec![0u8; 4]];
        let selected = select_certificate(&candidates, &public_key).unwrap();

        assert_eq!(selected.serial, 9);
    }

    #[test]
    fn select_fails_with_no_valid_candidates() {
        let (bytes, _) = signed_certificate(1);
        let (_, unrelated_key) = signed_certificate(2);

        let result = select_certificate(&[bytes], &unrelated_key);
        assert!(matches!(result, Err(CertificateError::NoValidCertificates)));
    }
}
