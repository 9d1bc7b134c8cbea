// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Datagram transport.
//
// One driver task owns the connected socket, the certificate state machine
// and the pending-query registry. Opening the transport performs the
// certificate acquisition exchange before any encrypted lookup; lookups
// issued while negotiation is in flight are queued and drained in FIFO
// order once the certificate is selected. Inbound packets are matched to
// pending queries purely by the client nonce half.
//
// State machine:
//   Init → RequestingCertificate → ValidatingCertificate → Ready
//    ^--------------------------------------------------------|  (reset)

use std::collections::VecDeque;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dnscrypt_common::certificate::{self, CertificateError};
use dnscrypt_common::crypto::{self, EncryptedQuery};
use dnscrypt_common::protocol;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use hickory_proto::serialize::binary::BinDecodable;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::lifecycle::Lifecycle;
use crate::queue::PendingQueue;
use crate::session::Session;
use crate::transport::{encode_query, random_id};
use crate::Error;

pub(crate) struct LookupRequest {
    pub name: Name,
    pub rrtype: RecordType,
    pub tx: oneshot::Sender<Result<Message, Error>>,
}

enum Command {
    Lookup(LookupRequest),
    Acquire(oneshot::Sender<Result<(), Error>>),
    Reset,
}

/// DNSCrypt over UDP.
pub struct UdpTransport {
    session: Arc<Mutex<Session>>,
    lifecycle: Lifecycle,
    commands: Mutex<Option<mpsc::Sender<Command>>>,
}

impl UdpTransport {
    pub fn new(session: Arc<Mutex<Session>>) -> Self {
        Self {
            session,
            lifecycle: Lifecycle::new(),
            commands: Mutex::new(None),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle.is_open()
    }

    /// Open the transport: bind + connect the socket, start the driver and
    /// run certificate acquisition to completion.
    ///
    /// Idempotent; concurrent callers share one negotiation.
    pub async fn open(&self) -> Result<(), Error> {
        if !self.lifecycle.begin_open().await? {
            return Ok(());
        }

        match self.connect().await {
            Ok(()) => {
                self.lifecycle.finish_open(true);
                Ok(())
            }
            Err(error) => {
                *self.commands.lock().await = None;
                self.lifecycle.finish_open(false);
                Err(error)
            }
        }
    }

    async fn connect(&self) -> Result<(), Error> {
        let (address, query_timeout, certificate_timeout) = {
            let session = self.session.lock().await;
            (
                session.resolver.address,
                session.query_timeout,
                session.certificate_timeout,
            )
        };

        let bind_address = match address {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };

        let socket = UdpSocket::bind(bind_address).await?;
        socket.connect(address).await?;

        let (commands, receiver) = mpsc::channel(64);
        let driver = Driver::new(
            socket,
            Arc::clone(&self.session),
            receiver,
            query_timeout,
            certificate_timeout,
        );
        tokio::spawn(driver.run());

        let (done, ready) = oneshot::channel();
        commands
            .send(Command::Acquire(done))
            .await
            .map_err(|_| Error::Closed)?;
        *self.commands.lock().await = Some(commands);

        ready.await.map_err(|_| Error::Closed)?
    }

    /// Resolve `name`/`rrtype` through the encrypted channel.
    pub async fn lookup(&self, name: Name, rrtype: RecordType) -> Result<Message, Error> {
        self.open().await?;

        let commands = self.commands.lock().await.clone().ok_or(Error::Closed)?;
        let (tx, rx) = oneshot::channel();
        commands
            .send(Command::Lookup(LookupRequest { name, rrtype, tx }))
            .await
            .map_err(|_| Error::Closed)?;

        rx.await.map_err(|_| Error::Closed)?
    }

    /// Drop the cached certificate and reset the state machine; the next
    /// lookup negotiates from scratch.
    pub async fn forget_certificate(&self) -> Result<(), Error> {
        self.lifecycle.ensure_open()?;

        let commands = self.commands.lock().await.clone().ok_or(Error::Closed)?;
        commands.send(Command::Reset).await.map_err(|_| Error::Closed)
    }

    /// Close the transport. Every still-pending caller receives a terminal
    /// `Closed` error exactly once.
    pub async fn close(&self) -> Result<(), Error> {
        if !self.lifecycle.begin_close().await {
            return Ok(());
        }

        // dropping the command channel stops the driver, which fails
        // outstanding queries on its way out
        *self.commands.lock().await = None;
        self.lifecycle.finish_close();
        Ok(())
    }
}

enum State {
    Init,
    RequestingCertificate { txid: u16, deadline: Instant },
    ValidatingCertificate,
    Ready,
}

struct PendingLookup {
    query: EncryptedQuery,
    tx: oneshot::Sender<Result<Message, Error>>,
}

struct Driver {
    socket: UdpSocket,
    session: Arc<Mutex<Session>>,
    commands: mpsc::Receiver<Command>,
    state: State,
    /// Lookups accepted before the certificate exists, drained FIFO.
    wait_queue: VecDeque<LookupRequest>,
    pending: PendingQueue<PendingLookup>,
    cert_waiters: Vec<oneshot::Sender<Result<(), Error>>>,
    certificate_timeout: Duration,
}

impl Driver {
    fn new(
        socket: UdpSocket,
        session: Arc<Mutex<Session>>,
        commands: mpsc::Receiver<Command>,
        query_timeout: Duration,
        certificate_timeout: Duration,
    ) -> Self {
        Self {
            socket,
            session,
            commands,
            state: State::Init,
            wait_queue: VecDeque::new(),
            pending: PendingQueue::new(query_timeout),
            cert_waiters: Vec::new(),
            certificate_timeout,
        }
    }

    async fn run(mut self) {
        let mut buf = vec![0u8; protocol::MAX_PAYLOAD];

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                received = self.socket.recv(&mut buf) => match received {
                    Ok(len) => self.on_datagram(&buf[..len]).await,
                    Err(error) => warn!(error = %error, "socket receive failed"),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline(Instant::now());
                }
            }
        }

        self.shutdown();
    }

    /// The single shared timer: nearest of the negotiation deadline and the
    /// pending-query deadlines; `None` disarms it.
    fn next_deadline(&self) -> Option<Instant> {
        let negotiation = match self.state {
            State::RequestingCertificate { deadline, .. } => Some(deadline),
            _ => None,
        };

        match (negotiation, self.pending.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Acquire(done) => match self.state {
                State::Ready => {
                    let _ = done.send(Ok(()));
                }
                State::Init => {
                    self.cert_waiters.push(done);
                    self.request_certificate().await;
                }
                _ => self.cert_waiters.push(done),
            },
            Command::Lookup(request) => match self.state {
                State::Ready => self.dispatch(request).await,
                State::Init => {
                    self.wait_queue.push_back(request);
                    self.request_certificate().await;
                }
                // a certificate request is already in flight; queue behind it
                // rather than starting a second one
                _ => self.wait_queue.push_back(request),
            },
            Command::Reset => {
                debug!("forget certificate");
                self.session.lock().await.certificate = None;
                self.state = State::Init;
            }
        }
    }

    /// Send the plaintext TXT query for the provider name.
    async fn request_certificate(&mut self) {
        let provider = self.session.lock().await.resolver.provider_name.clone();
        let txid = random_id();

        let name = match Name::from_utf8(&provider) {
            Ok(name) => name,
            Err(error) => {
                let message = error.to_string();
                self.fail_negotiation(|| Error::BadResponse(message.clone()));
                return;
            }
        };

        let mut query = Message::new();
        query
            .set_id(txid)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .add_query(Query::query(name, RecordType::TXT));

        let wire = match query.to_vec() {
            Ok(wire) => wire,
            Err(error) => {
                let message = error.to_string();
                self.fail_negotiation(|| Error::BadResponse(message.clone()));
                return;
            }
        };

        debug!(id = txid, provider = %provider, "requesting certificate");

        if let Err(error) = self.socket.send(&wire).await {
            let kind = error.kind();
            let message = error.to_string();
            self.fail_negotiation(move || Error::Io(std::io::Error::new(kind, message.clone())));
            return;
        }

        self.state = State::RequestingCertificate {
            txid,
            deadline: Instant::now() + self.certificate_timeout,
        };
    }

    /// Negotiation failed: report to every waiter and queued lookup, then
    /// return to `Init` so a later lookup can retry from scratch.
    fn fail_negotiation(&mut self, make: impl Fn() -> Error) {
        for waiter in self.cert_waiters.drain(..) {
            let _ = waiter.send(Err(make()));
        }

        for request in self.wait_queue.drain(..) {
            let _ = request.tx.send(Err(make()));
        }

        self.state = State::Init;
    }

    async fn on_datagram(&mut self, datagram: &[u8]) {
        match self.state {
            State::RequestingCertificate { txid, .. } => self.on_certificate(txid, datagram).await,
            State::Ready => self.on_response(datagram),
            _ => debug!(len = datagram.len(), "dropping datagram in inactive state"),
        }
    }

    /// Handle the certificate TXT response.
    async fn on_certificate(&mut self, txid: u16, datagram: &[u8]) {
        let Ok(response) = Message::from_bytes(datagram) else {
            return;
        };

        // stale or duplicate packets are ignored silently
        if response.id() != txid {
            debug!(id = response.id(), expected = txid, "transaction id mismatch");
            return;
        }

        self.state = State::ValidatingCertificate;

        let (provider, public_key) = {
            let session = self.session.lock().await;
            (
                session.resolver.provider_name.clone(),
                session.resolver.public_key,
            )
        };

        let candidates = match extract_certificates(&response, &provider) {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(error = %error, "bad certificate response");
                let message = error.to_string();
                self.fail_negotiation(|| Error::BadResponse(message.clone()));
                return;
            }
        };

        match certificate::select_certificate(&candidates, &public_key) {
            Ok(selected) => {
                debug!(serial = selected.serial, "certificate selected");
                self.session.lock().await.certificate = Some(selected);
                self.state = State::Ready;

                for waiter in self.cert_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }

                self.drain_wait_queue().await;
            }
            Err(error) => {
                warn!(error = %error, "certificate selection failed");
                self.fail_negotiation(|| {
                    Error::Certificate(CertificateError::NoValidCertificates)
                });
            }
        }
    }

    async fn drain_wait_queue(&mut self) {
        while let Some(request) = self.wait_queue.pop_front() {
            self.dispatch(request).await;
        }
    }

    /// Encrypt and send one lookup, registering it as pending.
    async fn dispatch(&mut self, request: LookupRequest) {
        let certificate = match self.session.lock().await.certificate.clone() {
            Some(certificate) => certificate,
            None => {
                let _ = request.tx.send(Err(Error::MissingCertificate));
                return;
            }
        };

        let wire = match encode_query(&request.name, request.rrtype) {
            Ok(wire) => wire,
            Err(error) => {
                let _ = request.tx.send(Err(error));
                return;
            }
        };

        let encrypted = match crypto::encrypt(&wire, &certificate) {
            Ok(encrypted) => encrypted,
            Err(error) => {
                let _ = request.tx.send(Err(error.into()));
                return;
            }
        };

        debug!(name = %request.name, rrtype = ?request.rrtype, "lookup dispatched");

        if let Err(error) = self.socket.send(&encrypted.message).await {
            let _ = request.tx.send(Err(error.into()));
            return;
        }

        self.pending.push(PendingLookup {
            query: encrypted,
            tx: request.tx,
        });
    }

    /// Handle an encrypted answer packet.
    fn on_response(&mut self, datagram: &[u8]) {
        if !crypto::is_enough(datagram) {
            return;
        }

        let answer = match crypto::parse(datagram) {
            Ok(answer) => answer,
            Err(error) => {
                debug!(error = %error, "undecodable packet");
                return;
            }
        };

        let Some(entry) = self
            .pending
            .drop_where(|pending| pending.query.client_nonce() == answer.client_nonce())
        else {
            debug!("no pending query for answer nonce");
            return;
        };

        // TODO: keep the entry pending on authentication failure instead of
        // failing the caller; a spoofed packet matching the nonce can
        // currently cancel a genuine in-flight query.
        let plaintext = match crypto::decrypt(&entry.query, &answer) {
            Ok(plaintext) => plaintext,
            Err(error) => {
                let _ = entry.tx.send(Err(error.into()));
                return;
            }
        };

        debug!(size = plaintext.len(), "response decrypted");

        match Message::from_bytes(&plaintext) {
            Ok(response) => {
                let _ = entry.tx.send(Ok(response));
            }
            Err(error) => {
                let _ = entry.tx.send(Err(error.into()));
            }
        }
    }

    /// The shared timer fired: fail an overdue negotiation and expire
    /// overdue queries. Timeout is terminal per query; there is no retry.
    fn on_deadline(&mut self, now: Instant) {
        if let State::RequestingCertificate { deadline, .. } = self.state {
            if deadline <= now {
                warn!("certificate negotiation timed out");
                self.fail_negotiation(|| Error::Timeout);
            }
        }

        for entry in self.pending.expire(now) {
            debug!("query timed out");
            let _ = entry.tx.send(Err(Error::Timeout));
        }
    }

    fn shutdown(mut self) {
        for entry in self.pending.clear() {
            let _ = entry.tx.send(Err(Error::Closed));
        }

        for request in self.wait_queue.drain(..) {
            let _ = request.tx.send(Err(Error::Closed));
        }

        for waiter in self.cert_waiters.drain(..) {
            let _ = waiter.send(Err(Error::Closed));
        }
    }
}

/// Pull candidate certificate buffers out of the TXT response.
fn extract_certificates(response: &Message, provider: &str) -> Result<Vec<Vec<u8>>, Error> {
    if response.message_type() != MessageType::Response {
        return Err(Error::BadResponse("not a response".into()));
    }

    if response.response_code() != ResponseCode::NoError {
        return Err(Error::BadResponse(format!(
            "rcode {}",
            response.response_code()
        )));
    }

    let mut provider_name =
        Name::from_utf8(provider).map_err(|error| Error::BadResponse(error.to_string()))?;
    provider_name.set_fqdn(true);

    let mut candidates = Vec::new();

    for record in response.answers() {
        if record.record_type() != RecordType::TXT || record.name() != &provider_name {
            continue;
        }

        if let Some(RData::TXT(txt)) = record.data() {
            for segment in txt.txt_data() {
                candidates.push(segment.to_vec());
            }
        }
    }

    if candidates.is_empty() {
        return Err(Error::BadResponse("no certificate TXT record".into()));
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::TXT;
    use hickory_proto::rr::Record;
    use std::str::FromStr;

    const PROVIDER: &str = "2.dnscrypt-cert.example.com";

    fn txt_response(name: &str, data: &[u8]) -> Message {
        let name = Name::from_str(&format!("{name}.")).unwrap();
        let record = Record::from_rdata(name, 300, RData::TXT(TXT::from_bytes(vec![data])));

        let mut response = Message::new();
        response
            .set_id(1)
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .add_answer(record);
        response
    }

    #[test]
    fn extracts_provider_txt_segments() {
        let response = txt_response(PROVIDER, &[1, 2, 3]);
        let candidates = extract_certificates(&response, PROVIDER).unwrap();

        assert_eq!(candidates, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn ignores_other_names() {
        let response = txt_response("other.example.com", &[1, 2, 3]);
        let result = extract_certificates(&response, PROVIDER);

        assert!(matches!(result, Err(Error::BadResponse(_))));
    }

    #[test]
    fn rejects_queries_and_failures() {
        let mut query = txt_response(PROVIDER, &[1]);
        query.set_message_type(MessageType::Query);
        assert!(extract_certificates(&query, PROVIDER).is_err());

        let mut servfail = txt_response(PROVIDER, &[1]);
        servfail.set_response_code(ResponseCode::ServFail);
        assert!(extract_certificates(&servfail, PROVIDER).is_err());
    }
}
