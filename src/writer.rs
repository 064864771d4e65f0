use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::{Clock, SystemClock};
use crate::compress::{spawn_compression, CompressionGate};
use crate::config::SinkConfig;
use crate::retention::spawn_prune;
use crate::rotation::{open_append, reopen_with_retry, rotated_path, RotationNamer};
use crate::{Error, Result};

/// A size-rotated, retention-managed append-only file.
///
/// Every append, including the rotation it may trigger, runs under one
/// lock, so concurrent writers are fully serialized. Compression of the
/// retired file and pruning of the directory happen on detached threads
/// after the lock work is done.
pub struct RotatingWriter {
    config: SinkConfig,
    state: Mutex<SinkState>,
    gate: CompressionGate,
    clock: Arc<dyn Clock>,
    rotations: AtomicU64,
    open: Opener,
}

/// Opens the canonical file for appending and reports its length.
type Opener = fn(&Path) -> Result<(File, u64)>;

struct SinkState {
    /// Present only while appends are accepted and the file is open.
    file: Option<File>,
    /// Bytes in the canonical file; equals its on-disk length between calls.
    current_size: u64,
    closed: bool,
    namer: RotationNamer,
}

impl RotatingWriter {
    /// Creates a sink. Nothing touches the filesystem until the first append.
    pub fn new(config: SinkConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SinkConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(SinkState {
                file: None,
                current_size: 0,
                closed: false,
                namer: RotationNamer::default(),
            }),
            gate: CompressionGate::new(),
            clock,
            rotations: AtomicU64::new(0),
            open: open_append,
        })
    }

    #[cfg(test)]
    fn with_opener(mut self, open: Opener) -> Self {
        self.open = open;
        self
    }

    /// Appends one already-formatted record.
    ///
    /// Opens the canonical file on first use, resuming its existing length.
    /// The record is never split: if it pushes the file past `max_size` it is
    /// written in full and the file is rotated before returning.
    ///
    /// # Errors
    ///
    /// - `Error::Closed`: the sink has been closed
    /// - `Error::Open`: the directory or file could not be opened
    /// - `Error::ShortWrite`: the OS accepted only part of the record
    /// - `Error::Rotate`: the record landed but the rename failed; the next
    ///   append reopens the canonical file and retries rotation
    /// - `Error::Reopen`: the record landed and the file was rotated, but a
    ///   fresh canonical file could not be opened within the retry budget
    pub fn append(&self, record: &[u8]) -> Result<usize> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if state.closed {
            return Err(Error::Closed);
        }

        if state.file.is_none() {
            let (file, len) = (self.open)(&self.config.path)?;
            state.current_size = len;
            state.file = Some(file);
        }
        let Some(file) = state.file.as_mut() else {
            return Err(Error::Closed);
        };

        let written = match file.write(record) {
            Ok(written) => written,
            Err(err) => {
                if let Ok(metadata) = file.metadata() {
                    state.current_size = metadata.len();
                }
                return Err(err.into());
            }
        };
        state.current_size += written as u64;
        if written < record.len() {
            return Err(Error::ShortWrite {
                written,
                expected: record.len(),
            });
        }

        if self.config.rotation_enabled() && state.current_size > self.config.max_size {
            self.rotate(state)?;
        }
        Ok(written)
    }

    fn rotate(&self, state: &mut SinkState) -> Result<()> {
        drop(state.file.take());

        let stamp = state.namer.next_stamp(self.clock.now());
        let rotated = rotated_path(&self.config.path, &stamp);
        if let Err(source) = std::fs::rename(&self.config.path, &rotated) {
            return Err(Error::Rotate {
                from: self.config.path.clone(),
                to: rotated,
                source,
            });
        }
        self.rotations.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "rotated {} to {}",
            self.config.path.display(),
            rotated.display()
        );

        let reopened = reopen_with_retry(
            &self.config.path,
            self.config.reopen_attempts,
            self.config.reopen_backoff,
            self.open,
        );
        let result = match reopened {
            Ok((file, len)) => {
                state.file = Some(file);
                state.current_size = len;
                Ok(())
            }
            Err(err) => {
                // The next append retries the open lazily.
                state.current_size = 0;
                log::error!("{err}");
                Err(err)
            }
        };

        if self.config.compress {
            spawn_compression(&self.gate, rotated);
        }
        if self.config.retention_enabled() {
            spawn_prune(self.config.dir(), self.config.max_age, self.clock.now());
        }
        result
    }

    /// Closes the file and waits, up to `close_timeout`, for an in-flight
    /// compression job to finish.
    ///
    /// The job is never interrupted; if it outlives the deadline, `close`
    /// returns anyway. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        {
            // Shutdown proceeds even if a writer panicked mid-append.
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            drop(state.file.take());
        }

        match self.gate.acquire_timeout(self.config.close_timeout) {
            Some(_permit) => {}
            None => log::warn!(
                "close of {} gave up waiting for compression after {:?}",
                self.config.path.display(),
                self.config.close_timeout
            ),
        }
        Ok(())
    }

    /// Bytes currently in the canonical file.
    pub fn current_size(&self) -> u64 {
        self.state
            .lock()
            .map(|state| state.current_size)
            .unwrap_or_else(|e| e.into_inner().current_size)
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.closed)
            .unwrap_or_else(|e| e.into_inner().closed)
    }

    /// Number of successful renames since this sink was created.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// The admission slot shared by this sink's compression jobs.
    pub fn compression_gate(&self) -> &CompressionGate {
        &self.gate
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, SinkState>> {
        self.state.lock().map_err(|_| Error::Poisoned)
    }
}

impl Write for &RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.append(buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.append(buf)?)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
