//! Rotating, retention-managed log file sink.
//!
//! A [`RotatingWriter`] appends already-formatted records to one canonical
//! file, renames it aside with a timestamp once it passes a size limit,
//! packs the retired file into a `.tar.gz` on a background thread and
//! prunes anything in the directory older than the retention window.
//! [`SinkLogger`] plugs a sink into the `log` facade.

pub mod clock;
pub mod compress;
pub mod config;
pub mod error;
pub mod logger;
pub mod retention;
mod rotation;
pub mod writer;

#[cfg(any(test, feature = "test-util"))]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use compress::{archive_path, compress_file, CompressionGate, GatePermit};
pub use config::SinkConfig;
pub use error::{Error, Result};
pub use logger::{FormatConfig, SinkLogger};
pub use retention::prune_expired;
pub use writer::RotatingWriter;
