//! Pull engine: device -> consumable byte sequence.
//!
//! A single decode loop reads DATA frames and forwards their payload, in
//! arrival order, into a bounded channel drained by the [`PullTransfer`]
//! holder. A slow consumer therefore slows the loop down instead of
//! growing a buffer.

use crate::error::{Result, SyncError};
use crate::sync::connection::{Connection, DeviceStream};
use crate::sync::parser::{ChunkSink, Parser};
use crate::sync::protocol::{RawTag, Tag, REPLY_PADDING};
use crate::sync::transfer::{Progress, TransferHandle, TransferStatus, TransferTracker};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, OwnedMutexGuard};

/// Handle for an in-flight pull; also a stream of the pulled bytes.
pub struct PullTransfer {
    handle: TransferHandle,
    data: mpsc::Receiver<Bytes>,
}

impl PullTransfer {
    pub(crate) fn start<S: DeviceStream>(
        conn: OwnedMutexGuard<Connection<S>>,
        path: &str,
        buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        let span = tracing::debug_span!("pull", path = %path);
        let handle = TransferHandle::spawn(span, move |tracker| run(conn, tx, tracker));
        Self { handle, data: rx }
    }

    /// Bytes received from the device so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.handle.bytes_transferred()
    }

    /// Watch that changes after every chunk.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.handle.progress()
    }

    pub fn status(&self) -> TransferStatus {
        self.handle.status()
    }

    /// Wait for the terminal state without taking the result.
    ///
    /// Unread chunks are kept; with a full buffer the pull cannot finish
    /// until they are consumed.
    pub async fn terminated(&self) -> TransferStatus {
        self.handle.terminated().await
    }

    /// Stop the pull and close the connection. Idempotent.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Next chunk of data, or `None` once the pull has ended.
    pub async fn chunk(&mut self) -> Option<Bytes> {
        self.data.recv().await
    }

    /// Collect all remaining data, then return it with the terminal result.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.data.recv().await {
            out.extend_from_slice(&chunk);
        }
        self.handle.finish().await?;
        Ok(out)
    }

    /// Write all remaining data to `writer`. Returns the bytes written.
    ///
    /// A local write failure cancels the pull.
    pub async fn copy_to<W>(mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.data.recv().await {
            if let Err(e) = writer.write_all(&chunk).await {
                self.handle.cancel();
                drop(self.data);
                let _ = self.handle.finish().await;
                return Err(SyncError::Source(e));
            }
            written += chunk.len() as u64;
        }
        writer.flush().await.map_err(SyncError::Source)?;
        self.handle.finish().await?;
        Ok(written)
    }

    /// Discard unread data and wait for the terminal result.
    pub async fn finish(mut self) -> Result<u64> {
        while self.data.recv().await.is_some() {}
        self.handle.finish().await
    }
}

impl Stream for PullTransfer {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.data.poll_recv(cx)
    }
}

async fn run<S: DeviceStream>(
    mut conn: OwnedMutexGuard<Connection<S>>,
    mut output: mpsc::Sender<Bytes>,
    tracker: TransferTracker,
) -> Result<u64> {
    // Dropping the handle closes the channel; treat that like a cancel
    let consumer = output.clone();

    let result = {
        let parser = conn.parser();
        tokio::select! {
            biased;
            _ = tracker.cancelled() => Err(SyncError::Cancelled),
            _ = consumer.closed() => Err(SyncError::Cancelled),
            r = read_loop(parser, &mut output, &tracker) => r,
        }
    };

    drop(consumer);
    drop(output);

    match &result {
        Ok(_) => conn.complete_exchange(),
        Err(e) if e.closes_connection() => {
            conn.close().await;
        }
        Err(_) => {}
    }

    drop(conn);
    result
}

/// Counts every forwarded chunk before handing it on.
struct CountingSink<'a> {
    inner: &'a mut mpsc::Sender<Bytes>,
    tracker: &'a TransferTracker,
}

#[async_trait]
impl<'a> ChunkSink for CountingSink<'a> {
    async fn put(&mut self, chunk: Bytes) -> Result<()> {
        let len = chunk.len();
        self.inner.put(chunk).await?;
        let total = self.tracker.record(len);
        tracing::trace!(chunk = len, total, "received DATA");
        Ok(())
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    parser: &mut Parser<R>,
    output: &mut mpsc::Sender<Bytes>,
    tracker: &TransferTracker,
) -> Result<u64> {
    let mut sink = CountingSink {
        inner: output,
        tracker,
    };
    loop {
        match parser.read_tag().await? {
            RawTag::Known(Tag::Data) => {
                let len = parser.read_u32_le().await? as usize;
                parser.read_into(len, &mut sink).await?;
            }
            RawTag::Known(Tag::Done) => {
                parser.read_bytes(REPLY_PADDING).await?;
                return Ok(tracker.bytes());
            }
            RawTag::Known(Tag::Fail) => return Err(parser.read_error().await),
            other => return Err(parser.unexpected(&other, "DATA, DONE or FAIL")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drive(wire: &[u8]) -> (Result<u64>, Vec<u8>) {
        let mut parser = Parser::new(wire);
        let (mut tx, mut rx) = mpsc::channel(64);
        let tracker = TransferTracker::detached();
        let result = read_loop(&mut parser, &mut tx, &tracker).await;
        drop(tx);

        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        (result, out)
    }

    #[tokio::test]
    async fn test_read_loop_concatenates_data() {
        let wire = b"DATA\x03\x00\x00\x00abcDATA\x02\x00\x00\x00deDONE\x00\x00\x00\x00";
        let (result, out) = drive(wire).await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(out, b"abcde");
    }

    #[tokio::test]
    async fn test_read_loop_empty_file() {
        let (result, out) = drive(b"DONE\x00\x00\x00\x00").await;
        assert_eq!(result.unwrap(), 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_read_loop_fail_keeps_earlier_data() {
        let wire = b"DATA\x02\x00\x00\x00okFAIL\x09\x00\x00\x00read fail";
        let (result, out) = drive(wire).await;
        match result {
            Err(SyncError::Fail { message }) => assert_eq!(message, "read fail"),
            other => panic!("Expected Fail, got {:?}", other),
        }
        assert_eq!(out, b"ok");
    }

    #[tokio::test]
    async fn test_read_loop_stops_on_unknown_tag() {
        let (result, out) = drive(b"OKAY\x00\x00\x00\x00DATA").await;
        assert!(result.unwrap_err().is_protocol_violation());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_read_loop_truncated_data() {
        let (result, _) = drive(b"DATA\x0a\x00\x00\x00abc").await;
        match result {
            Err(SyncError::PrematureEof { missing }) => assert_eq!(missing, 7),
            other => panic!("Expected PrematureEof, got {:?}", other),
        }
    }
}
