//! The process-wide logger and setup entry points.

use std::panic::Location;
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::config::LogConfig;
use crate::error::TelemetryResult;
use crate::level::Level;
use crate::logger::Logger;
use crate::record::{ExceptionInfo, SourceLocation};

/// The process-wide logger. Unconfigured (discarding) until
/// [`setup_logging`] runs.
pub fn global() -> &'static Logger {
    static GLOBAL: OnceLock<Logger> = OnceLock::new();
    GLOBAL.get_or_init(Logger::new)
}

/// Drains the global logger's queued writes when dropped.
///
/// The global logger lives in a static that is never dropped, so keep this
/// guard alive until the end of `main`; records still queued at process
/// exit are lost otherwise.
#[must_use = "dropping the guard drains the log queue immediately"]
#[derive(Debug)]
pub struct FlushGuard {
    _private: (),
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        global().flush();
    }
}

/// Configure the global logger.
///
/// Each call replaces the previous sinks; use a [`SetupGuard`] to make
/// startup idempotent.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or a log file cannot
/// be created.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<FlushGuard> {
    global().configure(config)?;
    Ok(FlushGuard { _private: () })
}

/// Set up default logging (INFO, colorized stderr, simple format).
///
/// # Errors
///
/// Returns an error if logging cannot be initialized.
pub fn setup_default_logging() -> TelemetryResult<FlushGuard> {
    setup_logging(&LogConfig::default())
}

/// Flush and remove every sink of the global logger.
pub fn shutdown() {
    global().shutdown();
}

/// Log `error` at ERROR through the global logger. An empty `message`
/// falls back to the error's own text.
#[track_caller]
pub fn log_error<E>(error: &E, message: &str)
where
    E: std::error::Error + ?Sized,
{
    let message = if message.is_empty() {
        error.to_string()
    } else {
        message.to_string()
    };
    global().log_error_at(Level::Error, error, message);
}

/// Log `error` at ERROR as `Unhandled exception in service`, binding the
/// caller's `file:line` as `caller`.
#[track_caller]
pub fn log_exception_with_caller<E>(error: &E)
where
    E: std::error::Error + ?Sized,
{
    let location = Location::caller();
    global()
        .with("caller", format!("{}:{}", location.file(), location.line()))
        .emit(
            Level::Error,
            SourceLocation::caller(location),
            "Unhandled exception in service",
            Some(ExceptionInfo::from_error(error)),
            None,
        );
}

/// Caller-owned flag that lets setup code run once.
///
/// ```rust,no_run
/// use modkit_telemetry::{LogConfig, SetupGuard, setup_logging};
///
/// static LOGGING: SetupGuard = SetupGuard::new();
///
/// # fn main() -> modkit_telemetry::TelemetryResult<()> {
/// let _flush = LOGGING.run_once(|| setup_logging(&LogConfig::default()))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SetupGuard {
    done: Mutex<bool>,
}

impl SetupGuard {
    /// A guard that has not run yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            done: Mutex::new(false),
        }
    }

    /// Run `setup` unless an earlier call already succeeded.
    ///
    /// Returns `Ok(Some(output))` if `setup` ran now and `Ok(None)` if it
    /// had already run. Concurrent callers wait for the running setup. A
    /// failed setup leaves the guard unset so it can be retried.
    ///
    /// # Errors
    ///
    /// Returns the error from `setup`.
    pub fn run_once<F, T>(&self, setup: F) -> TelemetryResult<Option<T>>
    where
        F: FnOnce() -> TelemetryResult<T>,
    {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        if *done {
            return Ok(None);
        }
        let output = setup()?;
        *done = true;
        Ok(Some(output))
    }

    /// Whether setup has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
