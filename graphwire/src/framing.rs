//! Chunked message framing (§4.B):
//! ```text
//! chunk   := u16_be length (1..65535) || length bytes
//! message := chunk+ || 0x00 0x00
//! ```
//! A zero-length chunk in the middle of a message is a NOOP keep-alive and is skipped on
//! receive. Encoders must never emit a chunk larger than `MAX_CHUNK_SIZE`.
//!
//! No teacher counterpart exists (ClickHouse's native protocol is varint-length-prefixed, not
//! chunked) — grounded on the spec's own description of the format, which matches
//! `original_source`'s bolt framing. Written in the teacher's extension-trait-over-socket style.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{GraphWireError, Result};
use crate::io::{ChunkRead, ChunkWrite};

pub const MAX_CHUNK_SIZE: usize = 16384;

/// Splits `message` into `MAX_CHUNK_SIZE`-or-smaller chunks and writes them followed by the
/// end-of-message marker. Buffers the whole message first, as the spec requires.
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin + Send>(
    writer: &mut W,
    message: &[u8],
) -> Result<()> {
    if message.is_empty() {
        // An empty message would be indistinguishable from the end-of-message marker; the
        // codec never produces one (every message is at least a one-byte marker).
        return Err(GraphWireError::Protocol(
            "refusing to frame an empty message".to_string(),
        ));
    }
    for chunk in message.chunks(MAX_CHUNK_SIZE) {
        writer.write_chunk_len(chunk.len() as u16).await?;
        writer.write_all(chunk).await?;
    }
    writer.write_chunk_len(0).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one full message, transparently skipping NOOP (zero-length, non-terminal) chunks.
/// Returns `None` on clean EOF before any bytes were read for this message.
pub async fn read_message<R: tokio::io::AsyncRead + Unpin + Send>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>> {
    let mut message = Vec::new();
    let mut started = false;
    loop {
        let len = match reader.read_chunk_len().await {
            Ok(len) => len,
            Err(GraphWireError::Io(e)) if !started && e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        started = true;
        if len == 0 {
            if message.is_empty() {
                // NOOP keep-alive chunk before any payload: skip and keep waiting.
                continue;
            }
            return Ok(Some(message));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        message.extend_from_slice(&buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_small_message() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let payload = b"hello bolt".to_vec();
        write_message(&mut client, &payload).await.unwrap();
        let received = read_message(&mut server).await.unwrap().unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn splits_large_message_into_chunks_and_reassembles() {
        let (mut client, mut server) = tokio::io::duplex(1 << 20);
        let payload = vec![7u8; MAX_CHUNK_SIZE * 3 + 42];
        write_message(&mut client, &payload).await.unwrap();
        let received = read_message(&mut server).await.unwrap().unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn skips_leading_noop_chunks() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        // Two keep-alive NOOPs, then a real one-chunk message.
        client.write_u16(0).await.unwrap();
        client.write_u16(0).await.unwrap();
        let payload = b"after noop".to_vec();
        write_message(&mut client, &payload).await.unwrap();
        let received = read_message(&mut server).await.unwrap().unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn clean_eof_before_any_chunk_is_none() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        let received = read_message(&mut server).await.unwrap();
        assert!(received.is_none());
    }

    #[test]
    fn never_emits_a_chunk_larger_than_max() {
        let payload = vec![1u8; MAX_CHUNK_SIZE * 2 + 1];
        for chunk in payload.chunks(MAX_CHUNK_SIZE) {
            assert!(chunk.len() <= MAX_CHUNK_SIZE);
        }
    }
}
