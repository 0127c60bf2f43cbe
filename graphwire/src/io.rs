//! Socket-facing byte primitives used by the chunked framer (§4.B).
//!
//! Packstream encoding/decoding itself (§4.A) is pure and operates over in-memory buffers — see
//! `packstream::encode`/`packstream::decode` — so the only async I/O primitive the wire layer
//! needs is "read/write a big-endian `u16`", which this module supplies as a small extension
//! trait in the same spirit as the teacher's `io.rs` (`ClickhouseRead`/`ClickhouseWrite`
//! blanket-implemented over `AsyncRead`/`AsyncWrite`).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

#[async_trait::async_trait]
pub trait ChunkRead: AsyncRead + Unpin + Send {
    async fn read_chunk_len(&mut self) -> Result<u16>;
}

#[async_trait::async_trait]
impl<T: AsyncRead + Unpin + Send> ChunkRead for T {
    async fn read_chunk_len(&mut self) -> Result<u16> {
        Ok(self.read_u16().await?)
    }
}

#[async_trait::async_trait]
pub trait ChunkWrite: AsyncWrite + Unpin + Send {
    async fn write_chunk_len(&mut self, len: u16) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: AsyncWrite + Unpin + Send> ChunkWrite for T {
    async fn write_chunk_len(&mut self, len: u16) -> Result<()> {
        Ok(self.write_u16(len).await?)
    }
}
