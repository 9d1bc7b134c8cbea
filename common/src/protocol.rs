// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DNSCrypt TCP framing: 2-byte big-endian length prefix + payload.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::buffer::ChunkBuffer;

/// Maximum frame payload (the length prefix is 16 bits).
pub const MAX_PAYLOAD: usize = 65535;

/// Write a length-prefixed message to a stream.
///
/// Format: `[2 bytes: big-endian length] [N bytes: payload]`
pub async fn write_framed<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
) -> std::io::Result<()> {
    if data.len() > MAX_PAYLOAD {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("payload too large: {} > {}", data.len(), MAX_PAYLOAD),
        ));
    }

    let len = (data.len() as u16).to_be_bytes();
    stream.write_all(&len).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// Extract one complete frame from accumulated stream chunks.
///
/// A frame is emitted only once at least 2 bytes are buffered to read the
/// declared length and that many further bytes have arrived; partial frames
/// are left untouched. Consumed bytes are discarded from the buffer.
pub fn extract_frame(chunks: &mut ChunkBuffer) -> Option<Vec<u8>> {
    let size = chunks.read_u16_be(0)? as usize;

    if chunks.len() < size + 2 {
        return None;
    }

    let frame = chunks.slice(2, size + 2);
    chunks.consume(size + 2);
    Some(frame)
}
