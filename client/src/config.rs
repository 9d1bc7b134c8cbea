// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resolver identity: either built from parts or decoded from an
// `sdns://` DNSCrypt stamp.
//
// Stamp payload (base64url, no padding):
//   [1 byte:  protocol id, 0x01 = DNSCrypt]
//   [8 bytes: informal properties bitmask, little-endian]
//   [1 byte len || bytes: resolver address, port optional (default 443)]
//   [1 byte len || bytes: provider Ed25519 public key (32 bytes)]
//   [1 byte len || bytes: provider name]

use std::net::{IpAddr, SocketAddr};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::Error;

/// Default resolver: quad9, dnscrypt on 9.9.9.10:8443 (no-log, no-filter).
pub const DEFAULT_RESOLVER: &str =
    "sdns://AQYAAAAAAAAADTkuOS45LjEwOjg0NDMgZ8hHuMh1jNEgJFVDvnVnRt803x2EwAuMRwNo34Idhj4ZMi5kbnNjcnlwdC1jZXJ0LnF1YWQ5Lm5ldA";

/// Stamp protocol id for plain DNSCrypt.
const STAMP_PROTOCOL_DNSCRYPT: u8 = 0x01;
/// Port assumed when the stamp address carries none.
const DEFAULT_PORT: u16 = 443;

/// The target resolver's identity.
///
/// Immutable once constructed; a resolver switch replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// The stamp this config was decoded from, if any.
    pub sdns: Option<String>,
    pub address: SocketAddr,
    /// DNS name under which the resolver publishes its certificate TXT record.
    pub provider_name: String,
    /// Provider Ed25519 public key used to verify certificate signatures.
    pub public_key: [u8; 32],
    /// Informal properties bitmask from the stamp.
    pub props: u64,
}

impl ResolverConfig {
    /// Build a config from explicit parts.
    pub fn new(address: SocketAddr, provider_name: impl Into<String>, public_key: [u8; 32]) -> Self {
        Self {
            sdns: None,
            address,
            provider_name: provider_name.into(),
            public_key,
            props: 0,
        }
    }

    /// Decode an `sdns://` stamp.
    pub fn from_stamp(sdns: &str) -> Result<Self, Error> {
        let encoded = sdns
            .strip_prefix("sdns://")
            .ok_or_else(|| Error::InvalidStamp("missing sdns:// prefix".into()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::InvalidStamp(e.to_string()))?;
        let mut reader = StampReader::new(&payload);

        let protocol = reader.u8()?;
        if protocol != STAMP_PROTOCOL_DNSCRYPT {
            return Err(Error::InvalidStamp(format!(
                "unsupported stamp protocol 0x{protocol:02x}"
            )));
        }

        let props = u64::from_le_bytes(
            reader
                .bytes(8)?
                .try_into()
                .map_err(|_| Error::InvalidStamp("truncated properties".into()))?,
        );

        let address = parse_address(std::str::from_utf8(reader.prefixed()?).map_err(|e| {
            Error::InvalidStamp(e.to_string())
        })?)?;

        let key_bytes = reader.prefixed()?;
        let public_key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| Error::InvalidStamp(format!("public key must be 32 bytes, got {}", key_bytes.len())))?;

        let provider_name = std::str::from_utf8(reader.prefixed()?)
            .map_err(|e| Error::InvalidStamp(e.to_string()))?
            .to_string();

        Ok(Self {
            sdns: Some(sdns.to_string()),
            address,
            provider_name,
            public_key,
            props,
        })
    }

    /// DNSSEC property bit.
    pub fn dnssec(&self) -> bool {
        self.props & 0x01 != 0
    }

    /// No-logs property bit.
    pub fn no_logs(&self) -> bool {
        self.props & 0x02 != 0
    }

    /// No-filters property bit.
    pub fn no_filters(&self) -> bool {
        self.props & 0x04 != 0
    }
}

fn parse_address(s: &str) -> Result<SocketAddr, Error> {
    if let Ok(address) = s.parse::<SocketAddr>() {
        return Ok(address);
    }

    if let Ok(ip) = s.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(Error::InvalidStamp(format!("invalid resolver address {s:?}")))
}

/// Cursor over the stamp payload.
struct StampReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> StampReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, Error> {
        let byte = self.bytes(1)?;
        Ok(byte[0])
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.payload.len() {
            return Err(Error::InvalidStamp("truncated stamp".into()));
        }

        let slice = &self.payload[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// One-byte length prefix followed by that many bytes.
    fn prefixed(&mut self) -> Result<&'a [u8], Error> {
        let len = self.u8()? as usize;
        self.bytes(len)
    }
}
