//! Remote file metadata.

use crate::sync::protocol::{S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use chrono::{DateTime, TimeZone, Utc};

/// Snapshot of remote file metadata, as reported by STAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// File type and permission bits
    pub mode: u32,

    /// File size in bytes
    pub size: u32,

    /// Modification time (Unix timestamp)
    pub mtime: u32,
}

impl Stats {
    pub fn new(mode: u32, size: u32, mtime: u32) -> Self {
        Self { mode, size, mtime }
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_directory(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits without the file type.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    pub fn modified(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(i64::from(self.mtime), 0)
            .single()
            .unwrap_or_default()
    }
}

/// One directory member from LIST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub stats: Stats,
}

impl Entry {
    pub fn new(name: impl Into<String>, mode: u32, size: u32, mtime: u32) -> Self {
        Self {
            name: name.into(),
            stats: Stats::new(mode, size, mtime),
        }
    }

    /// `.` and `..` are never exposed to callers.
    pub(crate) fn is_dot_entry(name: &str) -> bool {
        name == "." || name == ".."
    }
}

impl std::ops::Deref for Entry {
    type Target = Stats;

    fn deref(&self) -> &Stats {
        &self.stats
    }
}
