//! `log` facade backed by a rotating sink.
//!
//! Each record becomes one line:
//!
//! ```text
//! 2024-05-01 09:30:15.123456	[INFO]	app/main.rs:42	listening on 0.0.0.0:8080
//! ```
//!
//! Timestamps are UTC. The call site is the last two components of the
//! source path and is omitted when the record carries none.
//!
//! Records emitted by this crate itself (rotation, compression and retention
//! diagnostics) are never appended to the sink, since they can be logged
//! while the sink's lock is held. They go to a separate diagnostics writer,
//! stderr unless replaced.

use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::writer::RotatingWriter;

/// Records from this crate are diverted away from the sink they describe.
const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");
const CALL_SITE_COMPONENTS: usize = 2;

/// Formatting knobs for [`SinkLogger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Text inserted between the level and the call site.
    pub prefix: String,
    /// Include `file:line` when the record has it.
    pub call_site: bool,
    /// Append a captured backtrace to `ERROR` records.
    pub backtrace_on_error: bool,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            call_site: true,
            backtrace_on_error: false,
        }
    }
}

/// Leveled logger writing formatted records into a [`RotatingWriter`].
pub struct SinkLogger {
    sink: Arc<RotatingWriter>,
    level: AtomicUsize,
    format: FormatConfig,
    diagnostics: Mutex<Box<dyn io::Write + Send>>,
}

impl SinkLogger {
    pub fn new(sink: Arc<RotatingWriter>, level: LevelFilter) -> Self {
        Self::with_format(sink, level, FormatConfig::default())
    }

    pub fn with_format(sink: Arc<RotatingWriter>, level: LevelFilter, format: FormatConfig) -> Self {
        Self {
            sink,
            level: AtomicUsize::new(level as usize),
            format,
            diagnostics: Mutex::new(Box::new(io::stderr())),
        }
    }

    /// Replaces stderr as the destination for this crate's own records and
    /// for failures to append to the sink.
    pub fn with_diagnostics(self, out: impl io::Write + Send + 'static) -> Self {
        Self {
            diagnostics: Mutex::new(Box::new(out)),
            ..self
        }
    }

    pub fn level(&self) -> LevelFilter {
        level_from_usize(self.level.load(Ordering::Relaxed))
    }

    /// Changes the threshold for this logger. Installed loggers also need
    /// `log::set_max_level` raised for more verbose records to arrive.
    pub fn set_level(&self, level: LevelFilter) {
        self.level.store(level as usize, Ordering::Relaxed);
    }

    pub fn sink(&self) -> &Arc<RotatingWriter> {
        &self.sink
    }

    /// Installs this logger as the process-wide `log` backend.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let level = self.level();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(record, OffsetDateTime::now_utc(), &self.format);
        if is_own_target(record.target()) {
            self.write_diagnostic(line.as_bytes());
            return;
        }
        if let Err(err) = self.sink.append(line.as_bytes()) {
            self.write_diagnostic(format!("logroll: failed to write log record: {err}\n").as_bytes());
        }
    }

    fn flush(&self) {
        let mut out = self.diagnostics.lock().unwrap_or_else(|e| e.into_inner());
        let _ = out.flush();
    }
}

impl SinkLogger {
    fn write_diagnostic(&self, line: &[u8]) {
        let mut out = self.diagnostics.lock().unwrap_or_else(|e| e.into_inner());
        // Nowhere left to report a failing diagnostics writer.
        let _ = out.write_all(line);
    }
}

fn is_own_target(target: &str) -> bool {
    target == OWN_TARGET
        || target
            .strip_prefix(OWN_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

fn level_from_usize(value: usize) -> LevelFilter {
    match value {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Renders one record, trailing newline included.
pub fn format_record(record: &Record, now: OffsetDateTime, format: &FormatConfig) -> String {
    let date = now.date();
    let mut line = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}\t[{}]\t{}",
        date.year(),
        date.month() as u8,
        date.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.microsecond(),
        record.level(),
        format.prefix
    );
    if format.call_site {
        if let Some(file) = record.file() {
            let _ = write!(
                line,
                "{}:{}\t",
                short_file(file),
                record.line().unwrap_or(0)
            );
        }
    }
    let _ = write!(line, "{}", record.args());
    if format.backtrace_on_error && record.level() == log::Level::Error {
        let _ = write!(line, "\nTraceback:\n{}", Backtrace::force_capture());
    }
    line.push('\n');
    line
}

fn short_file(file: &str) -> &str {
    let mut cut = file.len();
    for _ in 0..CALL_SITE_COMPONENTS {
        match file[..cut].rfind('/') {
            Some(idx) => cut = idx,
            None => return file,
        }
    }
    &file[cut + 1..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SinkConfig;
    use log::Level;
    use tempfile::TempDir;

    fn fixed_time() -> OffsetDateTime {
        // 2024-05-01T09:30:15.123456Z
        OffsetDateTime::from_unix_timestamp_nanos(1_714_555_815_123_456_000).unwrap()
    }

    #[test]
    fn formats_level_call_site_and_message() {
        let line = format_record(
            &Record::builder()
                .args(format_args!("listening on {}", 8080))
                .level(Level::Info)
                .target("app")
                .file(Some("/home/build/app/src/main.rs"))
                .line(Some(42))
                .build(),
            fixed_time(),
            &FormatConfig::default(),
        );
        assert_eq!(
            line,
            "2024-05-01 09:30:15.123456\t[INFO]\tsrc/main.rs:42\tlistening on 8080\n"
        );
    }

    #[test]
    fn omits_call_site_when_unknown_and_applies_prefix() {
        let format = FormatConfig {
            prefix: "svc ".to_string(),
            ..FormatConfig::default()
        };
        let line = format_record(
            &Record::builder()
                .args(format_args!("boom"))
                .level(Level::Warn)
                .target("app")
                .build(),
            fixed_time(),
            &format,
        );
        assert_eq!(line, "2024-05-01 09:30:15.123456\t[WARN]\tsvc boom\n");
    }

    #[test]
    fn error_records_can_carry_a_backtrace() {
        let format = FormatConfig {
            backtrace_on_error: true,
            ..FormatConfig::default()
        };
        let line = format_record(
            &Record::builder()
                .args(format_args!("failed"))
                .level(Level::Error)
                .target("app")
                .build(),
            fixed_time(),
            &format,
        );
        assert!(line.contains("failed\nTraceback:\n"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn short_file_keeps_last_two_components() {
        assert_eq!(short_file("a/b/c/d.rs"), "c/d.rs");
        assert_eq!(short_file("c/d.rs"), "c/d.rs");
        assert_eq!(short_file("d.rs"), "d.rs");
    }

    #[test]
    fn own_targets_are_recognized() {
        assert!(is_own_target(OWN_TARGET));
        assert!(is_own_target(&format!("{OWN_TARGET}::writer")));
        assert!(!is_own_target(&format!("{OWN_TARGET}_app")));
        assert!(!is_own_target("app"));
    }

    #[test]
    fn level_filter_drops_verbose_records() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let sink = Arc::new(RotatingWriter::new(SinkConfig::new(&path)).unwrap());
        let logger = SinkLogger::new(Arc::clone(&sink), LevelFilter::Error);

        logger.log(
            &Record::builder()
                .args(format_args!("debug noise"))
                .level(Level::Debug)
                .target("app")
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("kept"))
                .level(Level::Error)
                .target("app")
                .build(),
        );
        logger.set_level(LevelFilter::Off);
        logger.log(
            &Record::builder()
                .args(format_args!("after off"))
                .level(Level::Error)
                .target("app")
                .build(),
        );
        sink.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[ERROR]\tkept\n"));
        assert!(!content.contains("debug noise"));
        assert!(!content.contains("after off"));
        assert_eq!(content.lines().count(), 1);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn own_records_go_to_diagnostics_not_the_sink() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let sink = Arc::new(RotatingWriter::new(SinkConfig::new(&path)).unwrap());
        let diagnostics = SharedBuf::default();
        let logger = SinkLogger::new(Arc::clone(&sink), LevelFilter::Trace)
            .with_diagnostics(diagnostics.clone());

        logger.log(
            &Record::builder()
                .args(format_args!("rotated"))
                .level(Level::Debug)
                .target("logroll::writer")
                .build(),
        );
        sink.close().unwrap();

        assert!(!path.exists());
        let text = String::from_utf8(diagnostics.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("[DEBUG]\trotated\n"), "{text:?}");
    }

    #[test]
    fn failed_appends_are_reported_to_diagnostics() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let sink = Arc::new(RotatingWriter::new(SinkConfig::new(&path)).unwrap());
        sink.close().unwrap();
        let diagnostics = SharedBuf::default();
        let logger = SinkLogger::new(Arc::clone(&sink), LevelFilter::Info)
            .with_diagnostics(diagnostics.clone());

        logger.log(
            &Record::builder()
                .args(format_args!("late"))
                .level(Level::Info)
                .target("app")
                .build(),
        );

        let text = String::from_utf8(diagnostics.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("failed to write log record: sink is closed"), "{text:?}");
    }
}
