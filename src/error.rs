use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced synchronously to callers of the sink.
///
/// Background maintenance (compression, pruning) never produces one of
/// these; those failures are only logged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("failed to rotate {} to {}: {source}", from.display(), to.display())]
    Rotate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to reopen {} after {attempts} attempts: {source}", path.display())]
    Reopen {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("sink is closed")]
    Closed,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sink lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(err) => err,
            Error::Closed => std::io::Error::new(std::io::ErrorKind::BrokenPipe, value),
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
