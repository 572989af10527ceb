//! Adapters that route output from other code into the logger.
//!
//! Rust offers no safe way to swap the process's stdout/stderr, so stream
//! capture is opt-in: code that wants its output captured writes through
//! [`stdout()`] / [`stderr()`], which hand out a [`StreamAdapter`] while a
//! [`StreamRedirect`] is installed and the real stream otherwise.
//!
//! [`TracingBridge`] does the same for the `tracing` ecosystem, so events
//! from dependencies end up in the same sinks.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{PoisonError, RwLock};

use tracing::field::{Field, Visit};
use tracing::subscriber::Interest;
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{TelemetryError, TelemetryResult};
use crate::level::Level;
use crate::logger::Logger;
use crate::record::{ContextMap, SourceLocation};

static REDIRECT: RwLock<Option<Logger>> = RwLock::new(None);

/// Line-buffered writer that re-emits each line as a record.
///
/// Empty lines are skipped. A trailing partial line is emitted on
/// [`Write::flush`] or drop.
pub struct StreamAdapter {
    logger: Logger,
    stream: &'static str,
    level: Level,
    pending: Vec<u8>,
}

impl std::fmt::Debug for StreamAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAdapter")
            .field("stream", &self.stream)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

impl StreamAdapter {
    /// Adapter named `stream` that emits at `level`.
    #[must_use]
    pub fn new(logger: Logger, stream: &'static str, level: Level) -> Self {
        Self {
            logger,
            stream,
            level,
            pending: Vec::new(),
        }
    }

    /// Adapter for standard output (INFO).
    #[must_use]
    pub fn stdout(logger: Logger) -> Self {
        Self::new(logger, "stdout", Level::Info)
    }

    /// Adapter for standard error (ERROR).
    #[must_use]
    pub fn stderr(logger: Logger) -> Self {
        Self::new(logger, "stderr", Level::Error)
    }

    /// Emit one line at `level`, bypassing the buffer.
    pub fn write_line(&self, line: &str, level: Level) {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return;
        }
        self.logger.root().emit(
            level,
            SourceLocation {
                target: self.stream.to_string(),
                function: None,
                line: None,
            },
            line,
            None,
            None,
        );
    }

    fn emit_complete_lines(&mut self) {
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.write_line(&String::from_utf8_lossy(&line), self.level);
        }
    }
}

impl Write for StreamAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.emit_complete_lines();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.write_line(&String::from_utf8_lossy(&rest), self.level);
        }
        Ok(())
    }
}

impl Drop for StreamAdapter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Routes [`stdout()`] and [`stderr()`] into a logger until dropped.
///
/// Redirects nest: dropping one restores whatever was installed before it.
#[derive(Debug)]
pub struct StreamRedirect {
    previous: Option<Logger>,
}

impl StreamRedirect {
    /// Start routing the redirectable streams into `logger`.
    #[must_use]
    pub fn install(logger: Logger) -> Self {
        let mut current = REDIRECT.write().unwrap_or_else(PoisonError::into_inner);
        Self {
            previous: current.replace(logger),
        }
    }

    /// Restore the previous routing. Same as dropping the redirect.
    pub fn uninstall(self) {
        drop(self);
    }

    /// Whether any redirect is active.
    #[must_use]
    pub fn is_active() -> bool {
        REDIRECT
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for StreamRedirect {
    fn drop(&mut self) {
        *REDIRECT.write().unwrap_or_else(PoisonError::into_inner) = self.previous.take();
    }
}

fn redirected() -> Option<Logger> {
    REDIRECT
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Standard output, or the logger while a redirect is installed.
#[must_use]
pub fn stdout() -> Box<dyn Write + Send> {
    match redirected() {
        Some(logger) => Box::new(StreamAdapter::stdout(logger)),
        None => Box::new(io::stdout()),
    }
}

/// Standard error, or the logger while a redirect is installed.
#[must_use]
pub fn stderr() -> Box<dyn Write + Send> {
    match redirected() {
        Some(logger) => Box::new(StreamAdapter::stderr(logger)),
        None => Box::new(io::stderr()),
    }
}

/// A `tracing` layer that turns events into log records.
///
/// The `message` field becomes the record message; every other field is
/// bound as context. Span data is ignored.
#[derive(Debug, Clone)]
pub struct TracingBridge {
    logger: Logger,
}

impl TracingBridge {
    /// Create a bridge into `logger`.
    #[must_use]
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for TracingBridge {
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        // Sink levels change on reconfigure, so never cache the answer.
        Interest::sometimes()
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        self.logger.enabled(Level::from(*metadata.level()))
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let location = SourceLocation {
            target: metadata.target().to_string(),
            function: None,
            line: metadata.line(),
        };
        self.logger.bind(visitor.fields).emit(
            Level::from(*metadata.level()),
            location,
            visitor.message.unwrap_or_default(),
            None,
            None,
        );
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: ContextMap,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut text = String::new();
        let _ = write!(text, "{value:?}");
        if field.name() == "message" {
            self.message = Some(text);
        } else {
            self.insert(field, serde_json::Value::String(text));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map_or_else(|| serde_json::Value::String(value.to_string()), Into::into);
        self.insert(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, serde_json::Value::String(value.to_string()));
    }
}

/// Install a [`TracingBridge`] into `logger` as the global dispatcher.
///
/// # Errors
///
/// Returns [`TelemetryError::InitError`] if a global dispatcher is already
/// set.
pub fn install_tracing_bridge(logger: Logger) -> TelemetryResult<()> {
    tracing_subscriber::registry()
        .with(TracingBridge::new(logger))
        .try_init()
        .map_err(|e| TelemetryError::InitError(format!("Failed to initialize tracing bridge: {e}")))
}
