//! Error types for adbsync.

use std::io;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The device reported a zero mode for the queried path.
    ///
    /// Carries the conventional `ENOENT` code and errno so it can be handled
    /// like any other filesystem "no such file" error.
    #[error("{code}, no such file or directory '{path}'")]
    NotFound {
        path: String,
        code: &'static str,
        errno: i32,
    },

    /// The device answered with a FAIL frame.
    #[error("device failure: {message}")]
    Fail { message: String },

    /// A frame tag arrived that is not valid at this point of the exchange.
    #[error("unexpected '{tag}', was expecting {expected}")]
    UnexpectedFrame { tag: String, expected: String },

    /// A length field announced more bytes than the frame kind allows.
    #[error("{what} of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },

    /// The connection ended in the middle of a frame.
    #[error("premature end of stream, needed {missing} more bytes")]
    PrematureEof { missing: usize },

    /// I/O error on the device connection.
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    /// Local I/O failed: the push source or the pull destination.
    #[error("local I/O error: {0}")]
    Source(#[source] io::Error),

    /// The transfer was cancelled.
    #[error("transfer cancelled")]
    Cancelled,

    /// The read channel was ended, usually by a decoded FAIL frame.
    #[error("read channel has ended")]
    ChannelEnded,

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Build the "no such file" error for a remote path.
    pub fn not_found(path: impl Into<String>) -> Self {
        SyncError::NotFound {
            path: path.into(),
            code: "ENOENT",
            errno: libc::ENOENT,
        }
    }

    /// Build a protocol violation for an unexpected frame tag.
    pub fn unexpected(tag: impl Into<String>, expected: impl Into<String>) -> Self {
        SyncError::UnexpectedFrame {
            tag: tag.into(),
            expected: expected.into(),
        }
    }

    /// Errno-style value, when the error has one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            SyncError::NotFound { errno, .. } => Some(*errno),
            SyncError::Io(e) | SyncError::Source(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Short error code such as `ENOENT`, when the error has one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            SyncError::NotFound { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true for failures of the connection itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Io(_) | SyncError::PrematureEof { .. })
    }

    /// Returns true when the two sides have lost frame synchronization.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SyncError::UnexpectedFrame { .. } | SyncError::FrameTooLarge { .. }
        )
    }

    /// Returns true if a transfer ending with this error must close the connection.
    ///
    /// A device FAIL during a pull only ends the read channel; everything else
    /// that interrupts a transfer leaves the stream in an unknown state.
    pub fn closes_connection(&self) -> bool {
        !matches!(
            self,
            SyncError::Fail { .. }
                | SyncError::NotFound { .. }
                | SyncError::ChannelEnded
                | SyncError::Closed
                | SyncError::Config(_)
        )
    }
}

impl From<SyncError> for io::Error {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Io(e) | SyncError::Source(e) => e,
            SyncError::NotFound { .. } => io::Error::new(io::ErrorKind::NotFound, err),
            SyncError::PrematureEof { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            SyncError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, err),
            SyncError::Closed | SyncError::ChannelEnded => {
                io::Error::new(io::ErrorKind::NotConnected, err)
            }
            SyncError::UnexpectedFrame { .. }
            | SyncError::FrameTooLarge { .. }
            | SyncError::Config(_) => {
                io::Error::new(io::ErrorKind::InvalidData, err)
            }
            SyncError::Fail { .. } => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}
