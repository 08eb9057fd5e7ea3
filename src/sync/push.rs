//! Push engine: local byte source -> device.
//!
//! Runs two halves concurrently inside one transfer task:
//!
//! ```text
//! +--------------+   DATA... DONE   +----------+
//! | writer half  | ---------------> |  device  |
//! | (source read)|                  |          |
//! +--------------+   OKAY | FAIL    |          |
//! | reader half  | <--------------- |          |
//! +--------------+                  +----------+
//! ```
//!
//! Either half failing drops its sibling (`try_join!`), and a cancel request
//! drops both. The writer only moves on once the transport has accepted the
//! previous write, so a saturated connection stalls the push instead of
//! buffering the source in memory.

use crate::error::{Result, SyncError};
use crate::sync::connection::{Connection, DeviceStream};
use crate::sync::parser::Parser;
use crate::sync::protocol::{encode_length, RawTag, Tag, REPLY_PADDING};
use crate::sync::transfer::{Progress, TransferHandle, TransferStatus, TransferTracker};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, OwnedMutexGuard};

/// Local byte source owned by a push for its whole lifetime.
pub type PushReader = Box<dyn AsyncRead + Send + Unpin>;

/// Handle for an in-flight push.
#[derive(Debug)]
pub struct PushTransfer {
    handle: TransferHandle,
}

impl PushTransfer {
    pub(crate) fn start<S: DeviceStream>(
        conn: OwnedMutexGuard<Connection<S>>,
        source: PushReader,
        path: &str,
        chunk_size: usize,
        mtime: u32,
    ) -> Self {
        let span = tracing::debug_span!("push", path = %path);
        let handle = TransferHandle::spawn(span, move |tracker| {
            run(conn, source, chunk_size, mtime, tracker)
        });
        Self { handle }
    }

    /// Bytes accepted by the connection so far.
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
    pub async fn terminated(&self) -> TransferStatus {
        self.handle.terminated().await
    }

    /// Cancel both halves and close the connection. Idempotent.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Wait for the push to end; returns the number of bytes sent.
    pub async fn finish(self) -> Result<u64> {
        self.handle.finish().await
    }
}

async fn run<S: DeviceStream>(
    mut conn: OwnedMutexGuard<Connection<S>>,
    mut source: PushReader,
    chunk_size: usize,
    mtime: u32,
    tracker: TransferTracker,
) -> Result<u64> {
    let writer_done = AtomicBool::new(false);

    let result = {
        let (parser, writer) = conn.split();
        let halves = async {
            tokio::try_join!(
                write_half(writer, &mut source, chunk_size, mtime, &tracker, &writer_done),
                read_half(parser),
            )
        };

        tokio::select! {
            biased;
            _ = tracker.cancelled() => Err(SyncError::Cancelled),
            r = halves => r.map(|_| tracker.bytes()),
        }
    };

    let close = match &result {
        Ok(_) => {
            conn.complete_exchange();
            false
        }
        // A rejection after DONE leaves the outbound side in sync
        Err(SyncError::Fail { .. }) => !writer_done.load(Ordering::Acquire),
        Err(e) => e.closes_connection(),
    };
    if close {
        conn.close().await;
    }

    drop(source);
    drop(conn);
    result
}

/// Stream the source as DATA frames, then send DONE with `mtime`.
async fn write_half<W, R>(
    writer: &mut W,
    source: &mut R,
    chunk_size: usize,
    mtime: u32,
    tracker: &TransferTracker,
    writer_done: &AtomicBool,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = fill_chunk(source, &mut buf)
            .await
            .map_err(SyncError::Source)?;
        if n == 0 {
            break;
        }

        writer.write_all(&encode_length(Tag::Data, n as u32)).await?;
        writer.write_all(&buf[..n]).await?;
        let total = tracker.record(n);
        tracing::trace!(chunk = n, total, "sent DATA");

        tokio::task::yield_now().await;
    }

    writer.write_all(&encode_length(Tag::Done, mtime)).await?;
    writer.flush().await?;
    writer_done.store(true, Ordering::Release);
    tracing::trace!(mtime, "sent DONE");
    Ok(())
}

/// Wait for the device's verdict on the pushed file.
async fn read_half<R: AsyncRead + Unpin>(parser: &mut Parser<R>) -> Result<()> {
    match parser.read_tag().await? {
        RawTag::Known(Tag::Okay) => {
            parser.read_bytes(REPLY_PADDING).await?;
            Ok(())
        }
        RawTag::Known(Tag::Fail) => Err(parser.read_error().await),
        other => Err(parser.unexpected(&other, "OKAY or FAIL")),
    }
}

/// Read until `buf` is full or the source ends. Returns the bytes read.
async fn fill_chunk<R>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
