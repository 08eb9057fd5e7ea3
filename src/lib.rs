//! Client for the Android device sync protocol.
//!
//! Runs on top of an already established connection to the device's `sync:`
//! service and provides `stat`, `readdir`, `push` and `pull`.
//!
//! ```ignore
//! use adbsync::SyncClient;
//!
//! let client = SyncClient::new(stream);
//! let stats = client.stat("/sdcard/Download").await?;
//!
//! let push = client.push_file("app.apk", &client.temp("app.apk"), None).await?;
//! push.finish().await?;
//!
//! let data = client.pull("/sdcard/notes.txt").await?.read_to_end().await?;
//! ```

pub mod config;
pub mod error;
pub mod sync;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use sync::{
    temp_path, Entry, Progress, PullTransfer, PushSource, PushTransfer, Stats, SyncClient,
    TransferStatus, DATA_MAX_LENGTH, DEFAULT_CHMOD, TEMP_PATH,
};
