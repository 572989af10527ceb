//! Timing and entry/exit instrumentation.
//!
//! Wrappers compose around closures rather than annotate functions:
//!
//! ```rust,no_run
//! use modkit_telemetry::{Logger, Timer};
//!
//! # fn load() -> Result<u32, std::io::Error> { Ok(1) }
//! let logger = Logger::new();
//! let rows = Timer::new(&logger, "load_vouchers").call(load);
//! ```
//!
//! Every wrapper logs an `Err` and hands back the identical value. A panic
//! unwinding through a wrapper is logged as a failure and keeps unwinding.

use std::fmt::{Debug, Display};
use std::time::{Duration, Instant};

use crate::level::Level;
use crate::logger::{BoundLogger, Logger};
use crate::record::{ExceptionInfo, SourceLocation};

const PANICKED: &str = "panicked";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureText {
    /// `[op] Failed: {err}`
    Plain,
    /// `[op] Failed after {secs}s: {err}`
    WithElapsed,
}

/// Shared start/done/failed bookkeeping for [`Timer`], [`ScopeGuard`] and
/// [`log_block`]. Finishes as "done" when dropped normally and as
/// "failed" when dropped during a panic.
struct ScopeTimer {
    logger: BoundLogger,
    operation: String,
    level: Level,
    location: SourceLocation,
    failure: FailureText,
    started: Instant,
    finished: bool,
}

impl ScopeTimer {
    fn start(
        logger: BoundLogger,
        operation: String,
        level: Level,
        location: SourceLocation,
        failure: FailureText,
    ) -> Self {
        let timer = Self {
            logger,
            operation,
            level,
            location,
            failure,
            started: Instant::now(),
            finished: false,
        };
        timer.emit(
            timer.level,
            format!("[{}] Starting...", timer.operation),
            None,
            None,
        );
        timer
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn done(&mut self) -> Duration {
        self.finished = true;
        let elapsed = self.elapsed();
        self.emit(
            self.level,
            format!("[{}] Done in {:.3}s", self.operation, elapsed.as_secs_f64()),
            None,
            Some(elapsed),
        );
        elapsed
    }

    fn failed(&mut self, error: &str, exception: Option<ExceptionInfo>) -> Duration {
        self.finished = true;
        let elapsed = self.elapsed();
        let message = match self.failure {
            FailureText::Plain => format!("[{}] Failed: {error}", self.operation),
            FailureText::WithElapsed => format!(
                "[{}] Failed after {:.3}s: {error}",
                self.operation,
                elapsed.as_secs_f64()
            ),
        };
        self.emit(Level::Error, message, exception, Some(elapsed));
        elapsed
    }

    fn emit(
        &self,
        level: Level,
        message: String,
        exception: Option<ExceptionInfo>,
        duration: Option<Duration>,
    ) {
        self.logger
            .emit(level, self.location.clone(), message, exception, duration);
    }
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            self.failed(PANICKED, Some(panic_info()));
        } else {
            self.done();
        }
    }
}

fn panic_info() -> ExceptionInfo {
    ExceptionInfo::from_message("panic", PANICKED)
}

/// Entry/exit tracing around a function call.
///
/// Logs `→ {name} | args=..` before the call and `← {name} | result=..`
/// after it, both at `level` (DEBUG by default). An `Err` is logged at
/// ERROR as `Exception in function {name}: {err}` and returned unchanged.
#[derive(Debug, Clone)]
pub struct Traced {
    logger: BoundLogger,
    name: String,
    entry: bool,
    exit: bool,
    level: Level,
    location: SourceLocation,
}

impl Traced {
    /// Trace calls to `name`. The caller's location is used for every record.
    #[track_caller]
    #[must_use]
    pub fn new(logger: impl Into<BoundLogger>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            logger: logger.into(),
            location: SourceLocation::caller(std::panic::Location::caller())
                .with_function(name.clone()),
            name,
            entry: true,
            exit: true,
            level: Level::Debug,
        }
    }

    /// Log the entry record.
    #[must_use]
    pub fn entry(mut self, enabled: bool) -> Self {
        self.entry = enabled;
        self
    }

    /// Log the exit record.
    #[must_use]
    pub fn exit(mut self, enabled: bool) -> Self {
        self.exit = enabled;
        self
    }

    /// Level of the entry and exit records.
    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Call `f(args)` once.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn call<A, T, E, F>(&self, args: A, f: F) -> Result<T, E>
    where
        A: Debug,
        T: Debug,
        E: Display + Debug,
        F: FnOnce(A) -> Result<T, E>,
    {
        if self.entry {
            self.emit(self.level, format!("→ {} | args={args:?}", self.name), None);
        }

        let watch = UnwindWatch { traced: self };
        let result = f(args);
        std::mem::forget(watch);

        match &result {
            Ok(value) if self.exit => {
                self.emit(self.level, format!("← {} | result={value:?}", self.name), None);
            },
            Ok(_) => {},
            Err(e) => self.emit(
                Level::Error,
                format!("Exception in function {}: {e}", self.name),
                Some(ExceptionInfo::from_display(e)),
            ),
        }
        result
    }

    /// Call a function without arguments.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        T: Debug,
        E: Display + Debug,
        F: FnOnce() -> Result<T, E>,
    {
        self.call((), |()| f())
    }

    /// Turn `f` into a traced function that can be called repeatedly.
    pub fn wrap<A, T, E, F>(self, f: F) -> impl Fn(A) -> Result<T, E>
    where
        A: Debug,
        T: Debug,
        E: Display + Debug,
        F: Fn(A) -> Result<T, E>,
    {
        move |args| self.call(args, &f)
    }

    fn emit(&self, level: Level, message: String, exception: Option<ExceptionInfo>) {
        self.logger
            .emit(level, self.location.clone(), message, exception, None);
    }
}

/// Logs a panic that unwinds out of a traced call. Forgotten on return.
struct UnwindWatch<'a> {
    traced: &'a Traced,
}

impl Drop for UnwindWatch<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.traced.emit(
                Level::Error,
                format!("Exception in function {}: {PANICKED}", self.traced.name),
                Some(panic_info()),
            );
        }
    }
}

/// Start/finish timing around a function call.
///
/// Logs `[op] Starting...` and `[op] Done in {secs}s` at `level` (INFO by
/// default); the done record carries the duration. An `Err` produces a
/// single ERROR record `[op] Failed: {err}` and is returned unchanged.
#[derive(Debug, Clone)]
pub struct Timer {
    logger: BoundLogger,
    operation: String,
    level: Level,
    location: SourceLocation,
}

impl Timer {
    /// Time calls to the function `name`, which is also the default
    /// operation name.
    #[track_caller]
    #[must_use]
    pub fn new(logger: impl Into<BoundLogger>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            logger: logger.into(),
            location: SourceLocation::caller(std::panic::Location::caller())
                .with_function(name.clone()),
            operation: name,
            level: Level::Info,
        }
    }

    /// Name used in the `[op]` prefix.
    #[must_use]
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Level of the start and done records.
    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Time one call of `f`.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: Display + Debug,
        F: FnOnce() -> Result<T, E>,
    {
        let mut scope = ScopeTimer::start(
            self.logger.clone(),
            self.operation.clone(),
            self.level,
            self.location.clone(),
            FailureText::Plain,
        );
        let result = f();
        match &result {
            Ok(_) => {
                scope.done();
            },
            Err(e) => {
                scope.failed(&e.to_string(), Some(ExceptionInfo::from_display(e)));
            },
        }
        result
    }

    /// Turn `f` into a timed function that can be called repeatedly.
    pub fn wrap<A, T, E, F>(self, f: F) -> impl Fn(A) -> Result<T, E>
    where
        E: Display + Debug,
        F: Fn(A) -> Result<T, E>,
    {
        move |args| self.call(|| f(args))
    }
}

/// An explicitly managed timed scope.
///
/// [`ScopeGuard::enter`] logs `[op] Starting...`. The scope ends with
/// [`ScopeGuard::exit`], [`ScopeGuard::fail`], or by being dropped, which
/// counts as a normal exit unless the thread is panicking.
pub struct ScopeGuard {
    timer: ScopeTimer,
}

impl std::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("operation", &self.timer.operation)
            .field("elapsed", &self.timer.elapsed())
            .finish_non_exhaustive()
    }
}

impl ScopeGuard {
    /// Open a scope logging at INFO.
    #[track_caller]
    #[must_use]
    pub fn enter(logger: impl Into<BoundLogger>, operation: impl Into<String>) -> Self {
        Self::enter_at(logger, operation, Level::Info)
    }

    /// Open a scope logging at `level`.
    #[track_caller]
    #[must_use]
    pub fn enter_at(
        logger: impl Into<BoundLogger>,
        operation: impl Into<String>,
        level: Level,
    ) -> Self {
        Self {
            timer: ScopeTimer::start(
                logger.into(),
                operation.into(),
                level,
                SourceLocation::caller(std::panic::Location::caller()),
                FailureText::WithElapsed,
            ),
        }
    }

    /// Time since the scope was entered.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }

    /// Close the scope normally.
    pub fn exit(mut self) -> Duration {
        self.timer.done()
    }

    /// Close the scope with an error, logged at ERROR.
    pub fn fail<E>(mut self, error: &E) -> Duration
    where
        E: Display + Debug + ?Sized,
    {
        self.timer
            .failed(&error.to_string(), Some(ExceptionInfo::from_display(error)))
    }
}

/// Run `f` inside a scope logging at INFO.
///
/// Blocks nest freely; each one has its own timer.
///
/// # Errors
///
/// Returns whatever `f` returns.
#[track_caller]
pub fn log_block<T, E, F>(logger: impl Into<BoundLogger>, operation: impl Into<String>, f: F) -> Result<T, E>
where
    E: Display + Debug,
    F: FnOnce() -> Result<T, E>,
{
    log_block_at(logger, operation, Level::Info, f)
}

/// [`log_block`] at a chosen level.
///
/// # Errors
///
/// Returns whatever `f` returns.
#[track_caller]
pub fn log_block_at<T, E, F>(
    logger: impl Into<BoundLogger>,
    operation: impl Into<String>,
    level: Level,
    f: F,
) -> Result<T, E>
where
    E: Display + Debug,
    F: FnOnce() -> Result<T, E>,
{
    let scope = ScopeGuard::enter_at(logger, operation, level);
    let result = f();
    match &result {
        Ok(_) => {
            scope.exit();
        },
        Err(e) => {
            scope.fail(e);
        },
    }
    result
}

impl Logger {
    /// Entry/exit tracing for `name` through this logger.
    #[track_caller]
    #[must_use]
    pub fn traced(&self, name: impl Into<String>) -> Traced {
        Traced::new(self, name)
    }

    /// Timing for `name` through this logger.
    #[track_caller]
    #[must_use]
    pub fn timer(&self, name: impl Into<String>) -> Timer {
        Timer::new(self, name)
    }

    /// Open a timed scope.
    #[track_caller]
    #[must_use]
    pub fn scope(&self, operation: impl Into<String>) -> ScopeGuard {
        ScopeGuard::enter(self, operation)
    }
}

impl BoundLogger {
    /// Entry/exit tracing for `name` with this handle's context.
    #[track_caller]
    #[must_use]
    pub fn traced(&self, name: impl Into<String>) -> Traced {
        Traced::new(self, name)
    }

    /// Timing for `name` with this handle's context.
    #[track_caller]
    #[must_use]
    pub fn timer(&self, name: impl Into<String>) -> Timer {
        Timer::new(self, name)
    }

    /// Open a timed scope with this handle's context.
    #[track_caller]
    #[must_use]
    pub fn scope(&self, operation: impl Into<String>) -> ScopeGuard {
        ScopeGuard::enter(self, operation)
    }
}
