//! Transfer lifecycle shared by push and pull.
//!
//! A transfer runs as one spawned task. The caller keeps a handle with the
//! progress and status watches, the cancel signal and the task's result.
//! The result is observed exactly once, through `finish`.
//!
//! Order of a terminal path inside the task:
//! 1. the engine stops (both halves for push)
//! 2. the connection is closed if the path requires it
//! 3. the local source and the connection guard are dropped
//! 4. the status watch moves to its terminal value and the result is returned

use crate::error::{Result, SyncError};
use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        self != TransferStatus::Running
    }

    fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => TransferStatus::Completed,
            Err(SyncError::Cancelled) => TransferStatus::Cancelled,
            Err(_) => TransferStatus::Failed,
        }
    }
}

/// Byte counters published after every chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Cumulative bytes moved so far
    pub bytes: u64,

    /// Size of the most recent chunk
    pub last_chunk: usize,
}

/// Engine side of a transfer.
pub(crate) struct TransferTracker {
    progress: watch::Sender<Progress>,
    cancel: watch::Receiver<bool>,
}

impl TransferTracker {
    /// Tracker with no handle attached, for driving an engine directly.
    #[cfg(test)]
    pub fn detached() -> Self {
        let (progress, _) = watch::channel(Progress::default());
        let (_, cancel) = watch::channel(false);
        Self { progress, cancel }
    }

    /// Count one chunk and return the new total.
    pub fn record(&self, chunk: usize) -> u64 {
        self.progress.send_modify(|p| {
            p.bytes += chunk as u64;
            p.last_chunk = chunk;
        });
        self.bytes()
    }

    pub fn bytes(&self) -> u64 {
        self.progress.borrow().bytes
    }

    /// Resolves once cancellation has been requested.
    ///
    /// If the handle is gone nobody can cancel any more, so this never resolves.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        loop {
            if *cancel.borrow_and_update() {
                return;
            }
            if cancel.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Caller side of a transfer.
#[derive(Debug)]
pub(crate) struct TransferHandle {
    progress: watch::Receiver<Progress>,
    status: watch::Receiver<TransferStatus>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<u64>>,
}

impl TransferHandle {
    /// Spawn the transfer task inside `span`.
    pub fn spawn<F, Fut>(span: tracing::Span, run: F) -> Self
    where
        F: FnOnce(TransferTracker) -> Fut,
        Fut: Future<Output = Result<u64>> + Send + 'static,
    {
        let (progress_tx, progress_rx) = watch::channel(Progress::default());
        let (status_tx, status_rx) = watch::channel(TransferStatus::Running);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let fut = run(TransferTracker {
            progress: progress_tx,
            cancel: cancel_rx,
        });

        let task = tokio::spawn(
            async move {
                let result = fut.await;
                let status = TransferStatus::of(&result);
                match &result {
                    Ok(bytes) => tracing::debug!(bytes, "transfer completed"),
                    Err(SyncError::Cancelled) => tracing::debug!("transfer cancelled"),
                    Err(e) => tracing::debug!(error = %e, "transfer failed"),
                }
                status_tx.send_replace(status);
                result
            }
            .instrument(span),
        );

        Self {
            progress: progress_rx,
            status: status_rx,
            cancel: cancel_tx,
            task,
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.progress.borrow().bytes
    }

    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    pub fn status(&self) -> TransferStatus {
        *self.status.borrow()
    }

    /// Wait until the transfer reaches a terminal state, without consuming the result.
    pub async fn terminated(&self) -> TransferStatus {
        let mut status = self.status.clone();
        loop {
            let current = *status.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if status.changed().await.is_err() {
                // Task is gone without publishing; treat as failed
                return TransferStatus::Failed;
            }
        }
    }

    /// Request cancellation. Idempotent, and a no-op once terminal.
    pub fn cancel(&self) {
        if self.status().is_terminal() {
            return;
        }
        self.cancel.send_if_modified(|requested| {
            if *requested {
                false
            } else {
                *requested = true;
                true
            }
        });
    }

    /// Wait for the terminal result.
    pub async fn finish(self) -> Result<u64> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SyncError::Cancelled),
        }
    }
}
