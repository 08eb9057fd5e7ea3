//! Sync facade.
//!
//! Owns one device connection and runs every exchange on it in turn. Each
//! operation takes the connection lock for its whole exchange; transfers move
//! the lock into their task, so a following command waits until the stream
//! before it has fully ended.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::sync::connection::{Connection, DeviceStream};
use crate::sync::metadata;
use crate::sync::protocol::{send_argument, Tag};
use crate::sync::pull::PullTransfer;
use crate::sync::push::{PushReader, PushTransfer};
use crate::sync::stats::{Entry, Stats};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;

/// Local data to push: a path opened on demand, or an already open reader.
pub enum PushSource {
    Path(PathBuf),
    Reader(PushReader),
}

impl PushSource {
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        PushSource::Reader(Box::new(reader))
    }
}

impl From<PathBuf> for PushSource {
    fn from(path: PathBuf) -> Self {
        PushSource::Path(path)
    }
}

impl From<&Path> for PushSource {
    fn from(path: &Path) -> Self {
        PushSource::Path(path.to_path_buf())
    }
}

impl From<File> for PushSource {
    fn from(file: File) -> Self {
        PushSource::reader(file)
    }
}

impl std::fmt::Debug for PushSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            PushSource::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Device path for a temporary copy of `local`: `dir` plus its base name.
pub fn temp_path(dir: &str, local: impl AsRef<Path>) -> String {
    let name = local
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

pub struct SyncClient<S> {
    conn: Arc<Mutex<Connection<S>>>,
    config: SyncConfig,
}

impl<S: DeviceStream> SyncClient<S> {
    /// Wrap an established sync connection with default settings.
    pub fn new(stream: S) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Connection::new(stream))),
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(stream: S, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::new(stream))),
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Device-side temporary path for a local file.
    pub fn temp(&self, local: impl AsRef<Path>) -> String {
        temp_path(&self.config.temp_dir, local)
    }

    pub async fn stat(&self, path: &str) -> Result<Stats> {
        let mut conn = self.conn.lock().await;
        metadata::stat(&mut conn, path).await
    }

    pub async fn readdir(&self, path: &str) -> Result<Vec<Entry>> {
        let mut conn = self.conn.lock().await;
        metadata::readdir(&mut conn, path).await
    }

    /// Push `source` to `path`. `mode` defaults to the configured mode; the
    /// regular file bit is always added.
    pub async fn push(
        &self,
        source: impl Into<PushSource>,
        path: &str,
        mode: Option<u32>,
    ) -> Result<PushTransfer> {
        match source.into() {
            PushSource::Path(local) => self.push_file(local, path, mode).await,
            PushSource::Reader(reader) => self.push_reader(reader, path, mode).await,
        }
    }

    /// Open `local` and push it to `path`.
    pub async fn push_file(
        &self,
        local: impl AsRef<Path>,
        path: &str,
        mode: Option<u32>,
    ) -> Result<PushTransfer> {
        let file = File::open(local.as_ref())
            .await
            .map_err(SyncError::Source)?;
        self.push_reader(Box::new(file), path, mode).await
    }

    /// Push everything `reader` yields to `path`.
    pub async fn push_stream<R>(
        &self,
        reader: R,
        path: &str,
        mode: Option<u32>,
    ) -> Result<PushTransfer>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.push_reader(Box::new(reader), path, mode).await
    }

    async fn push_reader(
        &self,
        reader: PushReader,
        path: &str,
        mode: Option<u32>,
    ) -> Result<PushTransfer> {
        let mode = mode.unwrap_or(self.config.default_mode);
        let mut conn = Arc::clone(&self.conn).lock_owned().await;

        // Sent with the final DONE
        let mtime = chrono::Utc::now().timestamp() as u32;
        conn.send_command(Tag::Send, &send_argument(path, mode)).await?;
        tracing::debug!(path, mode, "push started");

        Ok(PushTransfer::start(conn, reader, path, self.config.chunk_size, mtime))
    }

    /// Start reading `path` from the device.
    pub async fn pull(&self, path: &str) -> Result<PullTransfer> {
        let mut conn = Arc::clone(&self.conn).lock_owned().await;
        conn.send_command(Tag::Recv, path).await?;
        tracing::debug!(path, "pull started");
        Ok(PullTransfer::start(conn, path, self.config.pull_buffer))
    }

    /// Pull `path` into a new local file. Returns the bytes written.
    pub async fn pull_to_file(&self, path: &str, local: impl AsRef<Path>) -> Result<u64> {
        let mut file = File::create(local.as_ref())
            .await
            .map_err(SyncError::Source)?;
        self.pull(path).await?.copy_to(&mut file).await
    }

    /// Close the connection. Waits for an in-flight transfer to end first.
    pub async fn close(&self) -> bool {
        self.conn.lock().await.close().await
    }

    pub async fn is_closed(&self) -> bool {
        self.conn.lock().await.is_closed()
    }
}
