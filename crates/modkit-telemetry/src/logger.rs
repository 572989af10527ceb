//! The logging facade and bound handles.

use std::io::Write;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::config::LogConfig;
use crate::error::TelemetryResult;
use crate::hooks::{AsyncExceptionHook, PanicHookRegistration};
use crate::intercept::{self, StreamRedirect};
use crate::level::Level;
use crate::record::{ContextMap, ExceptionInfo, LogRecord, SourceLocation};
use crate::redact;
use crate::sink::{Sink, SinkKind, SinkSet};

/// Per-level logging methods shared by [`Logger`] and [`BoundLogger`].
macro_rules! level_methods {
    () => {
        /// Log a message at `level`.
        #[track_caller]
        pub fn log(&self, level: Level, message: impl Into<String>) {
            self.emit_message(level, message.into(), None);
        }

        /// Log at TRACE.
        #[track_caller]
        pub fn trace(&self, message: impl Into<String>) {
            self.emit_message(Level::Trace, message.into(), None);
        }

        /// Log at DEBUG.
        #[track_caller]
        pub fn debug(&self, message: impl Into<String>) {
            self.emit_message(Level::Debug, message.into(), None);
        }

        /// Log at INFO.
        #[track_caller]
        pub fn info(&self, message: impl Into<String>) {
            self.emit_message(Level::Info, message.into(), None);
        }

        /// Log at SUCCESS.
        #[track_caller]
        pub fn success(&self, message: impl Into<String>) {
            self.emit_message(Level::Success, message.into(), None);
        }

        /// Log at WARNING.
        #[track_caller]
        pub fn warning(&self, message: impl Into<String>) {
            self.emit_message(Level::Warning, message.into(), None);
        }

        /// Log at ERROR.
        #[track_caller]
        pub fn error(&self, message: impl Into<String>) {
            self.emit_message(Level::Error, message.into(), None);
        }

        /// Log at CRITICAL.
        #[track_caller]
        pub fn critical(&self, message: impl Into<String>) {
            self.emit_message(Level::Critical, message.into(), None);
        }

        /// Log an error and its source chain at ERROR.
        #[track_caller]
        pub fn exception<E>(&self, error: &E, message: impl Into<String>)
        where
            E: std::error::Error + ?Sized,
        {
            self.emit_message(
                Level::Error,
                message.into(),
                Some(ExceptionInfo::from_error(error)),
            );
        }

        /// Log an error and its source chain at `level`.
        #[track_caller]
        pub fn log_error_at<E>(&self, level: Level, error: &E, message: impl Into<String>)
        where
            E: std::error::Error + ?Sized,
        {
            self.emit_message(level, message.into(), Some(ExceptionInfo::from_error(error)));
        }
    };
}

/// Process-wide hooks and adapters a facade has installed.
#[derive(Default)]
struct Installed {
    panic_hook: Option<PanicHookRegistration>,
    async_runtime: Option<tokio::runtime::Handle>,
    streams: Option<StreamRedirect>,
    tracing_bridge: bool,
}

struct Core {
    sinks: RwLock<SinkSet>,
    base_context: RwLock<Arc<ContextMap>>,
    diagnose: AtomicBool,
    dropped: AtomicU64,
    installed: Mutex<Installed>,
}

impl Core {
    fn emit(
        &self,
        level: Level,
        location: SourceLocation,
        message: String,
        overlay: &ContextMap,
        exception: Option<ExceptionInfo>,
        duration: Option<Duration>,
    ) {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        if sinks.min_level().is_none_or(|min| level < min) {
            return;
        }

        let base = Arc::clone(&self.base_context.read().unwrap_or_else(PoisonError::into_inner));
        let context = if overlay.is_empty() {
            base
        } else {
            let mut merged = (*base).clone();
            merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
            Arc::new(merged)
        };

        let mut record = LogRecord::new(level, location, message);
        record.context = context;
        record.exception = if self.diagnose.load(Ordering::Relaxed) {
            exception
        } else {
            exception.map(ExceptionInfo::without_debug)
        };
        record.duration = duration;

        redact::redact(&mut record);
        sinks.emit(&record, &self.dropped);
    }

    fn installed(&self) -> std::sync::MutexGuard<'_, Installed> {
        self.installed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The logging facade.
///
/// A `Logger` is a cheap handle around shared state: clones see every
/// reconfiguration. It starts with no sinks, so records are discarded until
/// [`Logger::configure`] (or [`Logger::add_sink`]) is called.
///
/// `configure` replaces the whole sink set each time it runs. Guarding it
/// so it runs once per process is the caller's job (see
/// [`SetupGuard`](crate::SetupGuard)).
#[derive(Clone)]
pub struct Logger {
    core: Arc<Core>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("sinks", &self.sinks())
            .field("dropped_writes", &self.dropped_writes())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Create an unconfigured logger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(Core {
                sinks: RwLock::new(SinkSet::default()),
                base_context: RwLock::new(Arc::default()),
                diagnose: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                installed: Mutex::new(Installed::default()),
            }),
        }
    }

    /// Apply a configuration, replacing every existing sink.
    ///
    /// # Errors
    ///
    /// Returns a configuration error (before anything changes) if the config
    /// is invalid, or a sink IO error if the log directory or files cannot
    /// be created. After a sink IO error no sinks are registered.
    pub fn configure(&self, config: &LogConfig) -> TelemetryResult<()> {
        self.configure_inner(config, None)
    }

    /// Like [`Logger::configure`] but the terminal sink writes to `console`
    /// instead of standard error.
    ///
    /// # Errors
    ///
    /// Same as [`Logger::configure`].
    pub fn configure_with_console<W>(&self, config: &LogConfig, console: W) -> TelemetryResult<()>
    where
        W: Write + Send + 'static,
    {
        self.configure_inner(config, Some(Box::new(console)))
    }

    fn configure_inner(
        &self,
        config: &LogConfig,
        console: Option<Box<dyn Write + Send>>,
    ) -> TelemetryResult<()> {
        let level = config.validate()?;

        // Dropping the old set flushes and joins any enqueue workers, so the
        // previous files see no writes once this returns.
        drop(self.take_sinks());

        *self
            .core
            .base_context
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(config.bind_context.clone());
        self.core.diagnose.store(config.diagnose, Ordering::Relaxed);

        let sinks = SinkSet::from_config(config, level, console)?;
        *self.core.sinks.write().unwrap_or_else(PoisonError::into_inner) = sinks;

        self.apply_hooks(config);
        self.internal(Level::Info, "configure", "Logging initialized".to_string());
        Ok(())
    }

    fn apply_hooks(&self, config: &LogConfig) {
        let mut bridge_failure = None;
        {
            let mut installed = self.core.installed();

            if config.enable_exception_hooks {
                if installed.panic_hook.is_none() {
                    installed.panic_hook = Some(PanicHookRegistration::install(self.clone()));
                }
                if installed.async_runtime.is_none() {
                    installed.async_runtime = AsyncExceptionHook::current_runtime();
                }
            } else {
                if let Some(registration) = installed.panic_hook.take() {
                    registration.uninstall();
                }
                installed.async_runtime = None;
            }

            if config.override_stdout {
                if installed.streams.is_none() {
                    installed.streams = Some(StreamRedirect::install(self.clone()));
                }
            } else {
                // Dropping the redirect restores the real streams.
                installed.streams = None;
            }

            if config.intercept_tracing && !installed.tracing_bridge {
                match intercept::install_tracing_bridge(self.clone()) {
                    Ok(()) => installed.tracing_bridge = true,
                    Err(e) => bridge_failure = Some(e),
                }
            }
        }

        if let Some(e) = bridge_failure {
            self.internal(
                Level::Warning,
                "configure",
                format!("tracing events will not be intercepted: {e}"),
            );
        }
    }

    /// Install the async exception hook if it is not installed yet.
    ///
    /// Call this from inside a tokio runtime created after
    /// [`Logger::configure`]. Returns `None` if no runtime is current.
    pub fn install_async_hook(&self) -> Option<AsyncExceptionHook> {
        let mut installed = self.core.installed();
        if installed.async_runtime.is_none() {
            installed.async_runtime = AsyncExceptionHook::current_runtime();
        }
        installed
            .async_runtime
            .clone()
            .map(|runtime| AsyncExceptionHook::new(self.clone(), runtime))
    }

    /// The installed async exception hook, if any.
    #[must_use]
    pub fn async_hook(&self) -> Option<AsyncExceptionHook> {
        self.core
            .installed()
            .async_runtime
            .clone()
            .map(|runtime| AsyncExceptionHook::new(self.clone(), runtime))
    }

    /// Remove the panic hook and stream redirect this logger installed.
    ///
    /// The `tracing` bridge stays: a global dispatcher cannot be replaced.
    pub fn uninstall_hooks(&self) {
        let mut installed = self.core.installed();
        if let Some(registration) = installed.panic_hook.take() {
            registration.uninstall();
        }
        installed.async_runtime = None;
        installed.streams = None;
    }

    /// Register an extra sink next to the configured ones.
    ///
    /// It is removed by the next [`Logger::configure`].
    pub fn add_sink(&self, sink: Box<dyn Sink>) {
        self.core
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// What each active sink writes to.
    #[must_use]
    pub fn sinks(&self) -> Vec<SinkKind> {
        self.core
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .kinds()
    }

    /// Whether a record at `level` would reach at least one sink.
    #[must_use]
    pub fn enabled(&self, level: Level) -> bool {
        self.core
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .min_level()
            .is_some_and(|min| level >= min)
    }

    /// Flush every sink, waiting (bounded) for queued writes to land.
    ///
    /// Failures, including a queue that does not drain in time, are counted
    /// in [`Logger::dropped_writes`].
    pub fn flush(&self) {
        self.core
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .flush(&self.core.dropped);
    }

    /// Remove every sink, waiting for queued writes to land.
    pub fn shutdown(&self) {
        let sinks = self.take_sinks();
        sinks.flush(&self.core.dropped);
        drop(sinks);
    }

    fn take_sinks(&self) -> SinkSet {
        std::mem::take(&mut *self.core.sinks.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of sink writes that failed and were dropped.
    #[must_use]
    pub fn dropped_writes(&self) -> u64 {
        self.core.dropped.load(Ordering::Relaxed)
    }

    /// Context merged into every record from `bind_context`.
    #[must_use]
    pub fn base_context(&self) -> Arc<ContextMap> {
        Arc::clone(&self.core.base_context.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// A handle with no context of its own.
    #[must_use]
    pub fn root(&self) -> BoundLogger {
        BoundLogger {
            core: Arc::clone(&self.core),
            context: Arc::default(),
        }
    }

    /// Derive a handle carrying extra context.
    #[must_use]
    pub fn bind<I, K, V>(&self, pairs: I) -> BoundLogger
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.root().bind(pairs)
    }

    /// Derive a handle carrying one extra context entry.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> BoundLogger {
        self.root().with(key, value)
    }

    fn internal(&self, level: Level, function: &str, message: String) {
        self.core.emit(
            level,
            SourceLocation::internal(function),
            message,
            &ContextMap::new(),
            None,
            None,
        );
    }

    level_methods!();

    #[track_caller]
    fn emit_message(&self, level: Level, message: String, exception: Option<ExceptionInfo>) {
        self.root().emit_message(level, message, exception);
    }
}

/// A logger handle with its own context overlay.
///
/// Binding never mutates the source handle: each call allocates a new
/// overlay, so handles can be shared freely across threads.
#[derive(Clone)]
pub struct BoundLogger {
    core: Arc<Core>,
    context: Arc<ContextMap>,
}

impl std::fmt::Debug for BoundLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundLogger")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl From<&Logger> for BoundLogger {
    fn from(logger: &Logger) -> Self {
        logger.root()
    }
}

impl From<Logger> for BoundLogger {
    fn from(logger: Logger) -> Self {
        logger.root()
    }
}

impl From<&BoundLogger> for BoundLogger {
    fn from(logger: &BoundLogger) -> Self {
        logger.clone()
    }
}

impl BoundLogger {
    /// Derive a handle whose context is this one overlaid with `pairs`.
    /// New keys win on conflict.
    #[must_use]
    pub fn bind<I, K, V>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        let mut context = (*self.context).clone();
        context.extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self {
            core: Arc::clone(&self.core),
            context: Arc::new(context),
        }
    }

    /// Derive a handle with one extra context entry.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.bind([(key.into(), value.into())])
    }

    /// This handle's own context (without the facade's base context).
    #[must_use]
    pub fn context(&self) -> &ContextMap {
        &self.context
    }

    /// The facade this handle writes through.
    #[must_use]
    pub fn logger(&self) -> Logger {
        Logger {
            core: Arc::clone(&self.core),
        }
    }

    /// Whether a record at `level` would reach at least one sink.
    #[must_use]
    pub fn enabled(&self, level: Level) -> bool {
        self.logger().enabled(level)
    }

    /// Emit a fully specified record.
    pub fn emit(
        &self,
        level: Level,
        location: SourceLocation,
        message: impl Into<String>,
        exception: Option<ExceptionInfo>,
        duration: Option<Duration>,
    ) {
        self.core.emit(
            level,
            location,
            message.into(),
            &self.context,
            exception,
            duration,
        );
    }

    level_methods!();

    #[track_caller]
    fn emit_message(&self, level: Level, message: String, exception: Option<ExceptionInfo>) {
        let location = SourceLocation::caller(Location::caller());
        self.core
            .emit(level, location, message, &self.context, exception, None);
    }
}
