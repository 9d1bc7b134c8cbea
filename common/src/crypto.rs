// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// NaCl box encryption for DNSCrypt query transport.
//
// Wire format (client → resolver):
//   [8 bytes:  client-magic (from the certificate)]
//   [32 bytes: client ephemeral X25519 public key]
//   [12 bytes: client nonce half]
//   [N bytes:  XSalsa20-Poly1305 ciphertext (padded DNS query + 16-byte tag)]
//
// Wire format (resolver → client):
//   [8 bytes:  server-magic <r6fnvWj8>]
//   [24 bytes: nonce (client half || server half)]
//   [N bytes:  XSalsa20-Poly1305 ciphertext (padded DNS response + tag)]

use crypto_box::aead::Aead;
use crypto_box::{Nonce, PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::certificate::Certificate;

/// XSalsa20-Poly1305 nonce size (bytes).
pub const NONCE_LEN: usize = 24;
/// Client-generated half of the nonce, used to correlate answers to queries.
pub const HALF_NONCE_LEN: usize = NONCE_LEN / 2;
/// Queries are padded to a multiple of this block size.
pub const QUERY_BLOCK_SIZE: usize = 64;
/// Minimum padded query size (bytes).
pub const MIN_QUERY_SIZE: usize = 256;
/// ISO/IEC 7816-4 padding marker.
pub const PAD_MARKER: u8 = 0x80;
/// Fixed resolver-to-client magic, `r6fnvWj8` in ASCII.
pub const SERVER_MAGIC: [u8; 8] = *b"r6fnvWj8";
/// Smallest well-formed DNS message: 12-byte header + a root question.
pub const MIN_DNS_PACKET_SIZE: usize = 12 + 5;
/// Encrypted answer header: server-magic + full nonce.
pub const HEADER_LEN: usize = 8 + NONCE_LEN;
/// Smallest plausible encrypted answer.
pub const MIN_RESPONSE_LEN: usize = HEADER_LEN + MIN_DNS_PACKET_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("message too short: need at least {min} bytes, got {got}")]
    MessageTooShort { min: usize, got: usize },

    #[error("invalid magic header")]
    InvalidMagicHeader,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: authentication failure or data corruption")]
    DecryptionFailed,
}

/// One outbound encrypted query.
///
/// Keeps the precomputed shared key and the full nonce so the matching
/// answer can be opened later; the client nonce half uniquely identifies
/// this query among concurrently pending ones.
pub struct EncryptedQuery {
    /// Wire bytes ready to send.
    pub message: Vec<u8>,
    /// Full 24-byte nonce: random client half, zero server half.
    pub nonce: [u8; NONCE_LEN],
    shared: SalsaBox,
}

impl EncryptedQuery {
    /// The correlation key for this query.
    pub fn client_nonce(&self) -> &[u8] {
        &self.nonce[..HALF_NONCE_LEN]
    }
}

/// One inbound encrypted answer, parsed but not yet opened.
#[derive(Debug, Clone)]
pub struct EncryptedAnswer {
    /// Ciphertext following the header.
    pub message: Vec<u8>,
    /// Full 24-byte nonce: client half || server half.
    pub nonce: [u8; NONCE_LEN],
}

impl EncryptedAnswer {
    /// The client half of the nonce, matched against pending queries.
    pub fn client_nonce(&self) -> &[u8] {
        &self.nonce[..HALF_NONCE_LEN]
    }
}

/// Padding length for `len` bytes to a multiple of `block`, at least `min`.
pub fn pad_length(len: usize, block: usize, min: usize) -> usize {
    let remainder = len % block;

    if remainder == 0 && len >= min {
        return 0;
    }

    if len < min {
        return min - len;
    }

    block - remainder
}

/// Pad with a `0x80` marker byte followed by zeros.
///
/// Padding is mandatory whenever the input is below `min`, even if it is
/// already a multiple of `block`; it is omitted only when no padding bytes
/// are needed at all.
pub fn pad_right(data: &[u8], block: usize, min: usize) -> Vec<u8> {
    let padding = pad_length(data.len(), block, min);

    if padding == 0 {
        return data.to_vec();
    }

    let mut padded = Vec::with_capacity(data.len() + padding);
    padded.extend_from_slice(data);
    padded.push(PAD_MARKER);
    padded.resize(data.len() + padding, 0);
    padded
}

/// Strip padding by truncating at the last `0x80` marker.
///
/// A buffer without a marker is returned unmodified.
pub fn unpad_right(data: &[u8]) -> &[u8] {
    match data.iter().rposition(|&b| b == PAD_MARKER) {
        Some(i) => &data[..i],
        None => data,
    }
}

/// Quick length gate rejecting obviously truncated or garbage packets
/// before any decode attempt.
pub fn is_enough(data: &[u8]) -> bool {
    data.len() >= MIN_RESPONSE_LEN
}

/// Encrypt a DNS query for the resolver.
///
/// Generates an ephemeral X25519 keypair, pads the query, and seals it
/// under a fresh nonce with the key shared with the certificate's resolver
/// public key. The shared key is derived once and reused only to open this
/// query's answer.
pub fn encrypt(query: &[u8], certificate: &Certificate) -> Result<EncryptedQuery, Error> {
    let secret = SecretKey::generate(&mut OsRng);
    let public = secret.public_key();

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce[..HALF_NONCE_LEN]);

    let padded = pad_right(query, QUERY_BLOCK_SIZE, MIN_QUERY_SIZE);

    let resolver_pk = PublicKey::from(certificate.resolver_pk);
    let shared = SalsaBox::new(&resolver_pk, &secret);
    let ciphertext = shared
        .encrypt(&Nonce::from(nonce), padded.as_slice())
        .map_err(|_| Error::EncryptionFailed)?;

    let mut message = Vec::with_capacity(
        certificate.client_magic.len() + public.as_bytes().len() + HALF_NONCE_LEN + ciphertext.len(),
    );
    message.extend_from_slice(&certificate.client_magic);
    message.extend_from_slice(public.as_bytes());
    message.extend_from_slice(&nonce[..HALF_NONCE_LEN]);
    message.extend_from_slice(&ciphertext);

    Ok(EncryptedQuery {
        message,
        nonce,
        shared,
    })
}

/// Parse an encrypted answer envelope.
pub fn parse(message: &[u8]) -> Result<EncryptedAnswer, Error> {
    if message.len() < HEADER_LEN {
        return Err(Error::MessageTooShort {
            min: HEADER_LEN,
            got: message.len(),
        });
    }

    if message[..8] != SERVER_MAGIC {
        return Err(Error::InvalidMagicHeader);
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&message[8..HEADER_LEN]);

    Ok(EncryptedAnswer {
        message: message[HEADER_LEN..].to_vec(),
        nonce,
    })
}

/// Open an answer with the originating query's shared key and strip padding.
pub fn decrypt(query: &EncryptedQuery, answer: &EncryptedAnswer) -> Result<Vec<u8>, Error> {
    let padded = query
        .shared
        .decrypt(&Nonce::from(answer.nonce), answer.message.as_slice())
        .map_err(|_| Error::DecryptionFailed)?;

    Ok(unpad_right(&padded).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CERT_MAGIC, ES_VERSION_XSALSA20};

    fn test_certificate() -> (Certificate, SecretKey) {
        let resolver_sk = SecretKey::generate(&mut OsRng);
        let resolver_pk = *resolver_sk.public_key().as_bytes();
        let mut client_magic = [0u8; 8];
        client_magic.copy_from_slice(&resolver_pk[..8]);

        let certificate = Certificate {
            cert_magic: CERT_MAGIC,
            es_version: ES_VERSION_XSALSA20,
            min_protocol: 0,
            signature: [0u8; 64],
            resolver_pk,
            client_magic,
            serial: 1,
            ts_start: 0,
            ts_end: u32::MAX,
        };

        (certificate, resolver_sk)
    }

    /// Resolver side of one exchange, built from the same primitives.
    fn answer_query(query_wire: &[u8], resolver_sk: &SecretKey, response: &[u8]) -> Vec<u8> {
        let mut client_pk = [0u8; 32];
        client_pk.copy_from_slice(&query_wire[8..40]);
        let shared = SalsaBox::new(&PublicKey::from(client_pk), resolver_sk);

        let mut query_nonce = [0u8; NONCE_LEN];
        query_nonce[..HALF_NONCE_LEN].copy_from_slice(&query_wire[40..40 + HALF_NONCE_LEN]);

        let padded = shared
            .decrypt(&Nonce::from(query_nonce), &query_wire[40 + HALF_NONCE_LEN..])
            .unwrap();
        assert_eq!(unpad_right(&padded), b"dns query bytes");

        let mut nonce = query_nonce;
        OsRng.fill_bytes(&mut nonce[HALF_NONCE_LEN..]);

        let ciphertext = shared
            .encrypt(
                &Nonce::from(nonce),
                pad_right(response, QUERY_BLOCK_SIZE, MIN_QUERY_SIZE).as_slice(),
            )
            .unwrap();

        let mut wire = Vec::new();
        wire.extend_from_slice(&SERVER_MAGIC);
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(&ciphertext);
        wire
    }

    #[test]
    fn pad_roundtrip() {
        for len in [0usize, 1, 17, 63, 64, 100, 255, 256, 300, 320] {
            let data = vec![0x41u8; len];
            let padded = pad_right(&data, QUERY_BLOCK_SIZE, MIN_QUERY_SIZE);

            assert!(padded.len() >= MIN_QUERY_SIZE);
            assert_eq!(padded.len() % QUERY_BLOCK_SIZE, 0);
            assert_eq!(unpad_right(&padded), data.as_slice());
        }
    }

    #[test]
    fn pad_is_mandatory_below_minimum() {
        // 64 is already a block multiple but below the 256-byte minimum.
        let padded = pad_right(&[0x41u8; 64], QUERY_BLOCK_SIZE, MIN_QUERY_SIZE);
        assert_eq!(padded.len(), MIN_QUERY_SIZE);
        assert_eq!(padded[64], PAD_MARKER);
    }

    #[test]
    fn pad_is_omitted_at_block_multiple_above_minimum() {
        let data = vec![0x41u8; 320];
        assert_eq!(pad_right(&data, QUERY_BLOCK_SIZE, MIN_QUERY_SIZE), data);
    }

    #[test]
    fn unpad_without_marker_returns_input() {
        let data = [1u8, 2, 3, 4];
        assert_eq!(unpad_right(&data), &data);
    }

    #[test]
    fn encrypt_produces_wire_layout() {
        let (certificate, _) = test_certificate();
        let query = encrypt(b"dns query bytes", &certificate).unwrap();

        assert_eq!(&query.message[..8], &certificate.client_magic);
        assert_eq!(query.client_nonce(), &query.message[40..52]);
        assert_eq!(&query.nonce[HALF_NONCE_LEN..], &[0u8; HALF_NONCE_LEN]);
        // padded to the 256-byte minimum + 16-byte tag
        assert_eq!(query.message.len(), 8 + 32 + 12 + MIN_QUERY_SIZE + 16);
    }

    #[test]
    fn exchange_roundtrip() {
        let (certificate, resolver_sk) = test_certificate();
        let query = encrypt(b"dns query bytes", &certificate).unwrap();

        let wire = answer_query(&query.message, &resolver_sk, b"dns response bytes");
        assert!(is_enough(&wire));

        let answer = parse(&wire).unwrap();
        assert_eq!(answer.client_nonce(), query.client_nonce());

        let plaintext = decrypt(&query, &answer).unwrap();
        assert_eq!(plaintext, b"dns response bytes");
    }

    #[test]
    fn parse_rejects_wrong_magic() {
        let mut wire = vec![0u8; MIN_RESPONSE_LEN];
        wire[..8].copy_from_slice(b"notmagic");

        assert!(matches!(parse(&wire), Err(Error::InvalidMagicHeader)));
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(matches!(
            parse(&[0u8; 10]),
            Err(Error::MessageTooShort { .. })
        ));
    }

    #[test]
    fn decrypt_tampered_ciphertext_fails() {
        let (certificate, resolver_sk) = test_certificate();
        let query = encrypt(b"dns query bytes", &certificate).unwrap();

        let mut wire = answer_query(&query.message, &resolver_sk, b"dns response bytes");
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let answer = parse(&wire).unwrap();
        assert!(matches!(
            decrypt(&query, &answer),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn is_enough_gates_short_packets() {
        assert!(!is_enough(&[0u8; MIN_RESPONSE_LEN - 1]));
        assert!(is_enough(&[0u8; MIN_RESPONSE_LEN]));
    }
}
