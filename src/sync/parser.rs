//! Sequential reader over the inbound side of a device connection.
//!
//! One logical read sequence at a time. Once ended (by a decoded FAIL, a
//! protocol violation or a close) every further read fails with
//! [`SyncError::ChannelEnded`].

use crate::error::{Result, SyncError};
use crate::sync::protocol::{RawTag, DATA_MAX_LENGTH, MAX_MESSAGE_LENGTH};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Destination for bytes streamed out of the parser.
#[async_trait]
pub trait ChunkSink: Send {
    /// Accept the next chunk, in arrival order.
    async fn put(&mut self, chunk: Bytes) -> Result<()>;
}

#[async_trait]
impl ChunkSink for mpsc::Sender<Bytes> {
    async fn put(&mut self, chunk: Bytes) -> Result<()> {
        // The consumer went away
        self.send(chunk).await.map_err(|_| SyncError::Cancelled)
    }
}

#[async_trait]
impl ChunkSink for BytesMut {
    async fn put(&mut self, chunk: Bytes) -> Result<()> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

pub struct Parser<R> {
    reader: R,
    ended: bool,
}

impl<R: AsyncRead + Unpin> Parser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            ended: false,
        }
    }

    /// Terminate the channel. Idempotent.
    pub fn end(&mut self) {
        if !self.ended {
            tracing::trace!("parser channel ended");
            self.ended = true;
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn ensure_open(&self) -> Result<()> {
        if self.ended {
            Err(SyncError::ChannelEnded)
        } else {
            Ok(())
        }
    }

    /// Read exactly `n` raw bytes.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_open()?;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = self.reader.read(&mut buf[filled..]).await?;
            if read == 0 {
                return Err(SyncError::PrematureEof {
                    missing: n - filled,
                });
            }
            filled += read;
        }
        Ok(Bytes::from(buf))
    }

    /// Read exactly `n` bytes as ASCII text.
    pub async fn read_ascii(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4).await?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a u32 length field and reject it above `max`.
    ///
    /// A length past the limit means the stream is out of sync (or hostile),
    /// so the channel ends before anything is allocated for it.
    pub async fn read_length(&mut self, max: usize, what: &'static str) -> Result<usize> {
        let len = self.read_u32_le().await? as usize;
        if len > max {
            tracing::debug!(what, len, max, "length field over limit");
            self.end();
            return Err(SyncError::FrameTooLarge { what, len, max });
        }
        Ok(len)
    }

    /// Read a 4-byte frame tag.
    pub async fn read_tag(&mut self) -> Result<RawTag> {
        let bytes = self.read_bytes(4).await?;
        Ok(RawTag::parse(&bytes))
    }

    /// Stream exactly `n` bytes into `sink` as they arrive.
    ///
    /// Chunks never exceed the DATA frame limit; returns the number of chunks
    /// delivered.
    pub async fn read_into<S>(&mut self, n: usize, sink: &mut S) -> Result<usize>
    where
        S: ChunkSink + ?Sized,
    {
        self.ensure_open()?;
        let mut remaining = n;
        let mut chunks = 0;
        while remaining > 0 {
            let want = remaining.min(DATA_MAX_LENGTH);
            let mut buf = BytesMut::with_capacity(want);
            let read = (&mut self.reader)
                .take(want as u64)
                .read_buf(&mut buf)
                .await?;
            if read == 0 {
                return Err(SyncError::PrematureEof { missing: remaining });
            }
            remaining -= read;
            sink.put(buf.freeze()).await?;
            chunks += 1;
        }
        Ok(chunks)
    }

    /// Report an unexpected tag. The stream is out of sync, so the channel ends.
    pub fn unexpected(&mut self, tag: &RawTag, expected: &str) -> SyncError {
        tracing::debug!(tag = %tag, expected, "unexpected frame");
        self.end();
        SyncError::unexpected(tag.to_string(), expected)
    }

    /// Decode the body of a FAIL frame (the tag has been consumed) and end the channel.
    pub async fn read_error(&mut self) -> SyncError {
        let result = async {
            let len = self.read_length(MAX_MESSAGE_LENGTH, "FAIL message").await?;
            let message = self.read_bytes(len).await?;
            Ok::<_, SyncError>(String::from_utf8_lossy(&message).into_owned())
        }
        .await;
        self.end();
        match result {
            Ok(message) => {
                tracing::debug!(%message, "device reported failure");
                SyncError::Fail { message }
            }
            Err(e) => e,
        }
    }
}
