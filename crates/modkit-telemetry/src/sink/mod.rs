//! Output destinations.
//!
//! A [`Sink`] receives every record at or above its minimum level and is
//! responsible for formatting and writing it. [`SinkSet::from_config`]
//! builds the standard set: one terminal sink plus a rotating file per
//! severity in [`FILE_LEVELS`].

mod file;

pub use file::{RotatingFile, RotationPolicy};

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing_appender::non_blocking::{ErrorCounter, WorkerGuard};

use crate::config::LogConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::format::{FormatStyle, RecordFormat};
use crate::level::Level;
use crate::record::LogRecord;

/// Severities that get their own file, `{prefix}_{level}.log`.
pub const FILE_LEVELS: [Level; 2] = [Level::Info, Level::Error];

/// How long [`Sink::flush`] waits for an enqueue worker to catch up.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What a sink writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    /// Standard error, or an injected console writer.
    Terminal,
    /// A rotating log file.
    File(PathBuf),
    /// A caller-supplied sink.
    Custom(String),
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal => f.write_str("terminal"),
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// An output destination for records.
///
/// Implementations must be thread-safe; `emit` is called concurrently from
/// every thread that logs.
pub trait Sink: Send + Sync {
    /// What this sink writes to.
    fn kind(&self) -> SinkKind;

    /// Records below this level are not passed to [`Sink::emit`].
    fn min_level(&self) -> Level;

    /// Format and write one record.
    ///
    /// # Errors
    ///
    /// Returns the underlying write error. The facade counts and drops it.
    fn emit(&self, record: &LogRecord) -> io::Result<()>;

    /// Flush buffered output.
    ///
    /// # Errors
    ///
    /// Returns the underlying flush error.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Records the enqueue worker has written so far.
#[derive(Default)]
struct Landed {
    count: Mutex<u64>,
    changed: Condvar,
}

/// Worker-side writer that counts every record it hands on.
struct Counted<W> {
    inner: W,
    landed: Arc<Landed>,
}

impl<W: Write> Write for Counted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // The worker passes one whole record per call.
        let result = self.inner.write_all(buf);
        let mut count = self
            .landed
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_add(1);
        self.landed.changed.notify_all();
        result.map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Caller-side state of an enqueue worker.
struct Queue {
    sent: AtomicU64,
    lost: ErrorCounter,
    landed: Arc<Landed>,
    _guard: WorkerGuard,
}

impl Queue {
    /// Block until every record sent so far has been written, or `timeout`
    /// passes.
    fn drain(&self, timeout: Duration) -> io::Result<()> {
        let lost = u64::try_from(self.lost.dropped_lines()).unwrap_or(u64::MAX);
        let target = self.sent.load(Ordering::Acquire).saturating_sub(lost);
        let count = self
            .landed
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (_count, wait) = self
            .landed
            .changed
            .wait_timeout_while(count, timeout, |written| *written < target)
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "log queue did not drain in time",
            ));
        }
        Ok(())
    }
}

/// A sink that renders records with a [`RecordFormat`] into any writer.
///
/// With `enqueue` the writer is moved onto a `tracing_appender` worker
/// thread; callers only pay for formatting and a channel send.
/// [`Sink::flush`] waits (up to [`DRAIN_TIMEOUT`]) until the worker has
/// written everything queued so far. The worker is also flushed and joined
/// when the sink is dropped.
pub struct WriterSink {
    kind: SinkKind,
    min_level: Level,
    format: RecordFormat,
    writer: Mutex<Box<dyn Write + Send>>,
    // Declared after `writer` so the channel is closed before the guard joins.
    queue: Option<Queue>,
}

impl WriterSink {
    /// Create a sink over `writer`.
    pub fn new<W>(kind: SinkKind, min_level: Level, format: RecordFormat, writer: W, enqueue: bool) -> Self
    where
        W: Write + Send + 'static,
    {
        let (writer, queue): (Box<dyn Write + Send>, _) = if enqueue {
            let landed = Arc::new(Landed::default());
            let (non_blocking, guard) = tracing_appender::non_blocking(Counted {
                inner: writer,
                landed: Arc::clone(&landed),
            });
            let queue = Queue {
                sent: AtomicU64::new(0),
                lost: non_blocking.error_counter(),
                landed,
                _guard: guard,
            };
            (Box::new(non_blocking), Some(queue))
        } else {
            (Box::new(writer), None)
        };
        Self {
            kind,
            min_level,
            format,
            writer: Mutex::new(writer),
            queue,
        }
    }

    /// The format this sink renders with.
    #[must_use]
    pub fn format(&self) -> RecordFormat {
        self.format
    }
}

impl fmt::Debug for WriterSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterSink")
            .field("kind", &self.kind)
            .field("min_level", &self.min_level)
            .field("format", &self.format)
            .field("enqueue", &self.queue.is_some())
            .finish_non_exhaustive()
    }
}

impl Sink for WriterSink {
    fn kind(&self) -> SinkKind {
        self.kind.clone()
    }

    fn min_level(&self) -> Level {
        self.min_level
    }

    fn emit(&self, record: &LogRecord) -> io::Result<()> {
        let text = self.format.render(record);
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(text.as_bytes())?;
        if let Some(queue) = &self.queue {
            queue.sent.fetch_add(1, Ordering::Release);
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        match &self.queue {
            Some(queue) => queue.drain(DRAIN_TIMEOUT),
            None => self
                .writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .flush(),
        }
    }
}

/// The active sinks of one facade.
#[derive(Default)]
pub(crate) struct SinkSet {
    sinks: Vec<Box<dyn Sink>>,
}

impl SinkSet {
    /// Build the sinks a configuration asks for.
    ///
    /// `console` replaces standard error for the terminal sink.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::SinkIoError`] if the log directory or a log
    /// file cannot be created. Nothing is registered in that case.
    pub(crate) fn from_config(
        config: &LogConfig,
        level: Level,
        console: Option<Box<dyn Write + Send>>,
    ) -> TelemetryResult<Self> {
        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

        if config.to_terminal {
            let format = RecordFormat {
                style: config.format_style,
                colorize: config.ansi,
                serialize: config.serialize,
            };
            let writer = console.unwrap_or_else(|| Box::new(io::stderr()));
            sinks.push(Box::new(WriterSink::new(
                SinkKind::Terminal,
                level,
                format,
                writer,
                config.enqueue,
            )));
        }

        if config.to_file {
            std::fs::create_dir_all(&config.log_path)
                .map_err(|e| TelemetryError::sink_io(&config.log_path, e))?;
            let policy = RotationPolicy::from_limits(config.size_mb, config.retention_days);
            let format = RecordFormat {
                style: FormatStyle::Full,
                colorize: false,
                serialize: config.serialize,
            };
            for file_level in FILE_LEVELS {
                let path = file_path(&config.log_path, &config.name_prefix, file_level);
                let file = RotatingFile::open(&path, policy)
                    .map_err(|e| TelemetryError::sink_io(&path, e))?;
                sinks.push(Box::new(WriterSink::new(
                    SinkKind::File(path),
                    file_level,
                    format,
                    file,
                    config.enqueue,
                )));
            }
        }

        Ok(Self { sinks })
    }

    pub(crate) fn push(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub(crate) fn kinds(&self) -> Vec<SinkKind> {
        self.sinks.iter().map(|s| s.kind()).collect()
    }

    /// Lowest level any sink accepts, or `None` with no sinks.
    pub(crate) fn min_level(&self) -> Option<Level> {
        self.sinks.iter().map(|s| s.min_level()).min()
    }

    /// Hand the record to every sink that admits it. Failed writes are
    /// counted in `dropped` and otherwise ignored.
    pub(crate) fn emit(&self, record: &LogRecord, dropped: &AtomicU64) {
        for sink in &self.sinks {
            if record.level >= sink.min_level() && sink.emit(record).is_err() {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn flush(&self, dropped: &AtomicU64) {
        for sink in &self.sinks {
            if sink.flush().is_err() {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// `{dir}/{prefix}_{level}.log` with a lower-case level.
#[must_use]
pub fn file_path(dir: &Path, prefix: &str, level: Level) -> PathBuf {
    dir.join(format!("{prefix}_{}.log", level.as_str().to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SourceLocation;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn record(level: Level, message: &str) -> LogRecord {
        LogRecord::new(
            level,
            SourceLocation::caller(std::panic::Location::caller()),
            message,
        )
    }

    #[test]
    fn test_file_path_uses_lower_case_level() {
        let path = file_path(Path::new("logs"), "app", Level::Error);
        assert_eq!(path, Path::new("logs").join("app_error.log"));
    }

    #[test]
    fn test_sink_set_filters_by_min_level() {
        let buffer = Buffer::default();
        let mut set = SinkSet::default();
        set.push(Box::new(WriterSink::new(
            SinkKind::Custom("buffer".into()),
            Level::Warning,
            RecordFormat::plain(FormatStyle::Simple),
            buffer.clone(),
            false,
        )));
        let dropped = AtomicU64::new(0);

        set.emit(&record(Level::Info, "skipped"), &dropped);
        set.emit(&record(Level::Error, "kept"), &dropped);

        let text = buffer.text();
        assert!(!text.contains("skipped"));
        assert!(text.contains("ERROR: "));
        assert!(text.contains("| kept |"));
        assert_eq!(set.min_level(), Some(Level::Warning));
    }

    #[test]
    fn test_failed_write_is_counted_not_raised() {
        let mut set = SinkSet::default();
        set.push(Box::new(WriterSink::new(
            SinkKind::Custom("broken".into()),
            Level::Trace,
            RecordFormat::plain(FormatStyle::Simple),
            Broken,
            false,
        )));
        let dropped = AtomicU64::new(0);
        set.emit(&record(Level::Info, "lost"), &dropped);
        set.emit(&record(Level::Info, "lost again"), &dropped);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_enqueued_writes_land_after_drop() {
        let buffer = Buffer::default();
        let sink = WriterSink::new(
            SinkKind::Custom("queued".into()),
            Level::Trace,
            RecordFormat::plain(FormatStyle::Simple),
            buffer.clone(),
            true,
        );
        for i in 0..10 {
            sink.emit(&record(Level::Info, &format!("line {i}"))).unwrap();
        }
        drop(sink);
        assert_eq!(buffer.text().lines().count(), 10);
    }

    #[test]
    fn test_flush_waits_for_enqueued_writes() {
        let buffer = Buffer::default();
        let sink = WriterSink::new(
            SinkKind::Custom("queued".into()),
            Level::Trace,
            RecordFormat::plain(FormatStyle::Simple),
            buffer.clone(),
            true,
        );
        for i in 0..200 {
            sink.emit(&record(Level::Info, &format!("line {i}"))).unwrap();
        }

        sink.flush().unwrap();

        let text = buffer.text();
        assert_eq!(text.lines().count(), 200);
        assert!(text.contains("| line 199 |"));
    }

    #[test]
    fn test_flush_without_queue_is_immediate() {
        let sink = WriterSink::new(
            SinkKind::Custom("direct".into()),
            Level::Trace,
            RecordFormat::plain(FormatStyle::Simple),
            Buffer::default(),
            false,
        );
        sink.flush().unwrap();
    }

    #[test]
    fn test_from_config_without_outputs_is_empty() {
        let config = LogConfig::default().without_terminal();
        let set = SinkSet::from_config(&config, Level::Info, None).unwrap();
        assert!(set.kinds().is_empty());
        assert_eq!(set.min_level(), None);
    }

    #[test]
    fn test_from_config_registers_terminal_and_two_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = LogConfig::default().with_file_logging(temp.path(), "svc");
        let set = SinkSet::from_config(&config, Level::Debug, Some(Box::new(Buffer::default()))).unwrap();
        assert_eq!(
            set.kinds(),
            vec![
                SinkKind::Terminal,
                SinkKind::File(temp.path().join("svc_info.log")),
                SinkKind::File(temp.path().join("svc_error.log")),
            ]
        );
        assert_eq!(set.min_level(), Some(Level::Debug));
    }

    #[test]
    fn test_uncreatable_directory_is_sink_io_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let config = LogConfig::default()
            .without_terminal()
            .with_file_logging(blocker.join("logs"), "app");
        let err = SinkSet::from_config(&config, Level::Info, None).err().unwrap();
        assert!(matches!(err, TelemetryError::SinkIoError { .. }));
    }
}
