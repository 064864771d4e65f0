//! Rotation naming and file (re)opening.
//!
//! A rotated file keeps the canonical name with a UTC stamp spliced in
//! before the extension:
//!
//! ```text
//! app.log  ->  app.20240501T093015.123456.log
//! app      ->  app.20240501T093015.123456
//! ```
//!
//! Stamps are fixed width, so rotated files sort lexically by age.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use time::OffsetDateTime;

use crate::{Error, Result};

/// Hands out strictly increasing rotation stamps.
///
/// Two rotations inside the same microsecond, or across a clock step
/// backwards, still get distinct names: the stamp is bumped one
/// microsecond past the previous one.
#[derive(Debug, Default)]
pub(crate) struct RotationNamer {
    last_micros: Option<u64>,
}

impl RotationNamer {
    pub(crate) fn next_stamp(&mut self, now: SystemTime) -> String {
        let now_micros = now
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let micros = match self.last_micros {
            Some(last) if now_micros <= last => last.saturating_add(1),
            _ => now_micros,
        };
        self.last_micros = Some(micros);
        format_stamp(micros)
    }
}

fn format_stamp(micros: u64) -> String {
    let nanos = i128::from(micros) * 1_000;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let date = dt.date();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}.{:06}",
        date.year(),
        date.month() as u8,
        date.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.microsecond()
    )
}

/// Splices `stamp` into the file name of `canonical`.
pub(crate) fn rotated_path(canonical: &Path, stamp: &str) -> PathBuf {
    let stem = canonical
        .file_stem()
        .map(OsString::from)
        .unwrap_or_default();
    let mut name = stem;
    name.push(".");
    name.push(stamp);
    if let Some(ext) = canonical.extension() {
        name.push(".");
        name.push(ext);
    }
    canonical.with_file_name(name)
}

/// Opens `path` for appending, creating it and its parent directories as
/// needed. Returns the handle and the file's current length.
pub(crate) fn open_append(path: &Path) -> Result<(File, u64)> {
    let open_err = |source| Error::Open {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(open_err)?;
    let len = file.metadata().map_err(open_err)?.len();
    Ok((file, len))
}

/// Opens a fresh canonical file after a rename with `open`, retrying a
/// bounded number of times with a fixed backoff.
pub(crate) fn reopen_with_retry(
    path: &Path,
    attempts: u32,
    backoff: Duration,
    open: impl Fn(&Path) -> Result<(File, u64)>,
) -> Result<(File, u64)> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match open(path) {
            Ok(opened) => return Ok(opened),
            Err(Error::Open { source, .. }) if attempt >= attempts => {
                return Err(Error::Reopen {
                    path: path.to_path_buf(),
                    attempts,
                    source,
                });
            }
            Err(Error::Open { source, .. }) => {
                log::warn!(
                    "reopen of {} failed (attempt {attempt}/{attempts}): {source}",
                    path.display()
                );
            }
            Err(other) => return Err(other),
        }
        attempt += 1;
        std::thread::sleep(backoff);
    }
}
