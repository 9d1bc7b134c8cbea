// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport strategies: datagram (primary) and stream (truncation fallback).

pub mod tcp;
pub mod udp;

pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RecordType};
use rand::Rng;

use crate::Error;

/// Non-zero DNS transaction id.
pub(crate) fn random_id() -> u16 {
    rand::thread_rng().gen_range(1..=u16::MAX)
}

/// Encode a recursive query for `name`/`rrtype` with a fresh transaction id.
pub(crate) fn encode_query(name: &Name, rrtype: RecordType) -> Result<Vec<u8>, Error> {
    let mut message = Message::new();
    message
        .set_id(random_id())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .set_recursion_available(true)
        .add_query(Query::query(name.clone(), rrtype));

    Ok(message.to_vec()?)
}
