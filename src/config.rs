//! Sink configuration.
//!
//! Defines the canonical path, rotation threshold, retention window and
//! compression switch for a [`RotatingWriter`](crate::RotatingWriter).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const DEFAULT_PATH: &str = "./log/logger.log";
const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_REOPEN_ATTEMPTS: u32 = 5;
const DEFAULT_REOPEN_BACKOFF: Duration = Duration::from_millis(10);
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a rotating sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Canonical path of the active file. Parent directories are created on
    /// first write.
    /// Default: ./log/logger.log
    pub path: PathBuf,

    /// Rotate once the active file grows past this many bytes.
    /// 0 disables size-based rotation.
    /// Default: 100 MiB
    pub max_size: u64,

    /// Files in the sink's directory older than this are deleted after each
    /// rotation. Zero keeps everything.
    /// Default: 7 days
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,

    /// Package rotated files into `<rotated>.tar.gz` in the background.
    /// Default: true
    pub compress: bool,

    /// Attempts to open a fresh canonical file during rotation before the
    /// write fails.
    /// Default: 5
    pub reopen_attempts: u32,

    /// Sleep between reopen attempts.
    /// Default: 10ms
    #[serde(with = "humantime_serde")]
    pub reopen_backoff: Duration,

    /// Upper bound `close` waits for an in-flight compression.
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub close_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PATH),
            max_size: DEFAULT_MAX_SIZE,
            max_age: DEFAULT_MAX_AGE,
            compress: true,
            reopen_attempts: DEFAULT_REOPEN_ATTEMPTS,
            reopen_backoff: DEFAULT_REOPEN_BACKOFF,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl SinkConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.file_name().is_none() {
            return Err(Error::InvalidConfig(format!(
                "path {} does not name a file",
                self.path.display()
            )));
        }
        if self.reopen_attempts == 0 {
            return Err(Error::InvalidConfig(
                "reopen_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding the canonical file and everything rotated out of it.
    pub fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn rotation_enabled(&self) -> bool {
        self.max_size > 0
    }

    pub fn retention_enabled(&self) -> bool {
        !self.max_age.is_zero()
    }
}
