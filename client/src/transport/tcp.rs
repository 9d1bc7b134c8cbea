// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stream transport.
//
// Used as the fallback for truncated UDP answers. The certificate must
// already have been obtained via the datagram path; this transport never
// negotiates one. Exactly one query/response pair is exchanged per TCP
// connection and the connection is closed afterwards; reuse for a second
// query is not allowed by the protocol.

use std::net::SocketAddr;
use std::sync::Arc;

use dnscrypt_common::crypto::{self, EncryptedQuery};
use dnscrypt_common::{protocol, ChunkBuffer};
use hickory_proto::op::Message;
use hickory_proto::rr::{Name, RecordType};
use hickory_proto::serialize::binary::BinDecodable;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::lifecycle::Lifecycle;
use crate::session::Session;
use crate::transport::encode_query;
use crate::Error;

/// DNSCrypt over TCP.
pub struct TcpTransport {
    session: Arc<Mutex<Session>>,
    lifecycle: Lifecycle,
}

impl TcpTransport {
    pub fn new(session: Arc<Mutex<Session>>) -> Self {
        Self {
            session,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Open the transport. Fails with `MissingCertificate` unless the
    /// datagram path has already cached one.
    pub async fn open(&self) -> Result<(), Error> {
        if !self.lifecycle.begin_open().await? {
            return Ok(());
        }

        if self.session.lock().await.certificate.is_some() {
            self.lifecycle.finish_open(true);
            Ok(())
        } else {
            self.lifecycle.finish_open(false);
            Err(Error::MissingCertificate)
        }
    }

    pub async fn close(&self) -> Result<(), Error> {
        if self.lifecycle.begin_close().await {
            self.lifecycle.finish_close();
        }
        Ok(())
    }

    /// Resolve `name`/`rrtype` over a fresh connection.
    pub async fn lookup(&self, name: Name, rrtype: RecordType) -> Result<Message, Error> {
        self.open().await?;

        let (address, certificate, query_timeout) = {
            let session = self.session.lock().await;
            let certificate = session
                .certificate
                .clone()
                .ok_or(Error::MissingCertificate)?;
            (session.resolver.address, certificate, session.query_timeout)
        };

        let wire = encode_query(&name, rrtype)?;
        let encrypted = crypto::encrypt(&wire, &certificate)?;

        debug!(name = %name, rrtype = ?rrtype, "tcp lookup");

        match timeout(query_timeout, exchange(address, &encrypted)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }
}

/// One framed query/response exchange. The stream is dropped (closing the
/// connection) as soon as the answer is delivered or on error.
async fn exchange(address: SocketAddr, query: &EncryptedQuery) -> Result<Message, Error> {
    let mut stream = TcpStream::connect(address).await?;

    protocol::write_framed(&mut stream, &query.message).await?;

    let mut chunks = ChunkBuffer::new();

    loop {
        let mut chunk = vec![0u8; 4096];
        let read = stream.read(&mut chunk).await?;

        if read == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before answer",
            )));
        }

        chunk.truncate(read);
        chunks.append(chunk);

        let Some(frame) = protocol::extract_frame(&mut chunks) else {
            continue;
        };

        let answer = crypto::parse(&frame)?;

        if answer.client_nonce() != query.client_nonce() {
            debug!("answer nonce does not match query, discarding frame");
            continue;
        }

        let plaintext = crypto::decrypt(query, &answer)?;
        return Ok(Message::from_bytes(&plaintext)?);
    }
}
