//! Background compression of rotated files.
//!
//! A rotated file is packed as the sole entry of a tar archive, streamed
//! through gzip to `<rotated>.tar.gz`, and removed only once the archive is
//! complete on disk. At most one job runs per sink: the [`CompressionGate`]
//! is a single admission slot that jobs take without blocking and that
//! `close` waits on with a deadline.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;

pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Default)]
struct GateState {
    held: Mutex<bool>,
    released: Condvar,
}

/// Capacity-one admission slot for compression jobs.
///
/// Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct CompressionGate {
    state: Arc<GateState>,
}

impl CompressionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the slot if it is free. Never blocks on a running job.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let mut held = self.state.held.lock().unwrap_or_else(|e| e.into_inner());
        if *held {
            return None;
        }
        *held = true;
        Some(GatePermit {
            state: Arc::clone(&self.state),
        })
    }

    /// Waits up to `timeout` for the slot to free up, then takes it.
    ///
    /// Returns `None` if a job still holds the slot at the deadline.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<GatePermit> {
        let held = self.state.held.lock().unwrap_or_else(|e| e.into_inner());
        let (mut held, _) = self
            .state
            .released
            .wait_timeout_while(held, timeout, |held| *held)
            .unwrap_or_else(|e| e.into_inner());
        if *held {
            return None;
        }
        *held = true;
        Some(GatePermit {
            state: Arc::clone(&self.state),
        })
    }

    pub fn is_held(&self) -> bool {
        *self.state.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// RAII guard for the compression slot.
///
/// Dropping the permit frees the slot and wakes anyone waiting in
/// [`CompressionGate::acquire_timeout`].
#[derive(Debug)]
pub struct GatePermit {
    state: Arc<GateState>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let mut held = self.state.held.lock().unwrap_or_else(|e| e.into_inner());
        *held = false;
        self.state.released.notify_all();
    }
}

/// `<source>.tar.gz`
pub fn archive_path(source: &Path) -> PathBuf {
    append_suffix(source, ARCHIVE_SUFFIX)
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Packs `source` into `<source>.tar.gz` and deletes `source`.
///
/// The entry is named after the source's file name and keeps its mode and
/// modification time. The archive is built under a temporary name and
/// renamed into place, so a failure at any step leaves `source` untouched
/// and no partial archive behind.
pub fn compress_file(source: &Path) -> io::Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", source.display()),
        )
    })?;
    let dest = archive_path(source);
    let tmp = append_suffix(&dest, TMP_SUFFIX);

    let mut input = File::open(source)?;
    // Leftover from an interrupted job.
    let _ = fs::remove_file(&tmp);
    if let Err(err) = write_archive(&mut input, name, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    drop(input);

    if let Err(err) = fs::rename(&tmp, &dest) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::remove_file(source)?;
    Ok(dest)
}

fn write_archive(input: &mut File, name: &std::ffi::OsStr, tmp: &Path) -> io::Result<()> {
    let output = File::create(tmp)?;
    let mut builder = tar::Builder::new(GzEncoder::new(output, Compression::default()));
    builder.append_file(name, input)?;
    let encoder = builder.into_inner()?;
    let output = encoder.finish()?;
    output.sync_all()
}

/// Starts a compression job for `source` if the gate is free.
///
/// The slot is claimed before the job thread starts, so a concurrent
/// `close` always observes a job that has been handed off. Returns `false`
/// when the job was skipped; the rotated file then stays uncompressed.
pub fn spawn_compression(gate: &CompressionGate, source: PathBuf) -> bool {
    let Some(permit) = gate.try_acquire() else {
        log::info!(
            "compression of {} skipped: another job is in flight",
            source.display()
        );
        return false;
    };

    let spawned = std::thread::Builder::new()
        .name("logroll-compress".to_string())
        .spawn(move || {
            let _permit = permit;
            run_job(&source);
        });
    match spawned {
        Ok(_) => true,
        Err(err) => {
            log::error!("failed to spawn compression job: {err}");
            false
        }
    }
}

fn run_job(source: &Path) {
    match compress_file(source) {
        Ok(dest) => log::debug!("compressed {} into {}", source.display(), dest.display()),
        // Retention got there first; the file is already gone.
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::debug!("compression of {} skipped: file is gone", source.display())
        }
        Err(err) => log::error!("failed to compress {}: {err}", source.display()),
    }
}
