//! Client configuration.
//!
//! Every field has a default matching the device-side conventions, so an
//! empty TOML document is a valid configuration.

use crate::error::{Result, SyncError};
use crate::sync::protocol::{DATA_MAX_LENGTH, DEFAULT_CHMOD, TEMP_PATH};
use serde::{Deserialize, Serialize};

/// Default number of pulled chunks buffered ahead of the consumer.
pub const DEFAULT_PULL_BUFFER: usize = 16;

/// Tunables for a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bytes read from the local source per DATA frame (at most 64KB)
    pub chunk_size: usize,

    /// Device directory used by [`SyncClient::temp`](crate::SyncClient::temp)
    pub temp_dir: String,

    /// Permission bits sent when a push does not specify a mode
    pub default_mode: u32,

    /// Pulled chunks buffered before the engine waits for the consumer
    pub pull_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: DATA_MAX_LENGTH,
            temp_dir: TEMP_PATH.to_string(),
            default_mode: DEFAULT_CHMOD,
            pull_buffer: DEFAULT_PULL_BUFFER,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(s).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that all values are usable by the transfer engines.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > DATA_MAX_LENGTH {
            return Err(SyncError::Config(format!(
                "chunk_size must be between 1 and {}, got {}",
                DATA_MAX_LENGTH, self.chunk_size
            )));
        }
        if self.pull_buffer == 0 {
            return Err(SyncError::Config("pull_buffer must be at least 1".into()));
        }
        if !self.temp_dir.starts_with('/') {
            return Err(SyncError::Config(format!(
                "temp_dir must be an absolute device path, got '{}'",
                self.temp_dir
            )));
        }
        Ok(())
    }
}
