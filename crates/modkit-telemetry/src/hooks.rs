//! Last-resort exception capture.
//!
//! Two hooks feed otherwise-unobserved failures into the logger:
//!
//! - [`PanicHookRegistration`] chains onto the process panic hook and logs
//!   every panic at CRITICAL before handing it to the previous hook, which
//!   keeps the default reporting and termination behaviour.
//! - [`AsyncExceptionHook`] supervises tokio tasks and logs the ones that
//!   panic at ERROR.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::level::Level;
use crate::logger::Logger;
use crate::record::{ExceptionInfo, SourceLocation};

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

/// Serializes installs and uninstalls of the process panic hook.
static HOOK_LOCK: Mutex<()> = Mutex::new(());

thread_local! {
    /// Set while a supervised task is being polled on this thread.
    static IN_SUPERVISED_TASK: Cell<bool> = const { Cell::new(false) };
}

/// Panic payload for a deliberate interrupt or cancellation.
///
/// `std::panic::panic_any(Interrupted)` unwinds like any panic, but the
/// panic hook passes it straight to the previous hook without logging it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Handle to an installed panic hook.
///
/// The hook runs before unwinding starts, so it cannot tell whether a panic
/// will be caught later. Panics that end up in `std::panic::catch_unwind`
/// or in an unsupervised tokio task (which turns them into a `JoinError`)
/// are still logged as CRITICAL `Unhandled exception`. Tasks spawned
/// through [`AsyncExceptionHook::spawn`] are the exception: they are
/// reported once, by the async hook.
///
/// After logging, the hook drains queued writes (see
/// [`Logger::flush`]) so the record survives the process ending.
///
/// Uninstalling assumes no other hook was installed on top of this one.
pub struct PanicHookRegistration {
    previous: Arc<PanicHook>,
}

impl std::fmt::Debug for PanicHookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanicHookRegistration").finish_non_exhaustive()
    }
}

impl PanicHookRegistration {
    /// Install a panic hook that logs through `logger`.
    ///
    /// # Panics
    ///
    /// Panics if called from a panicking thread (a `std::panic::set_hook`
    /// restriction).
    #[must_use]
    pub fn install(logger: Logger) -> Self {
        let _lock = HOOK_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        let previous: Arc<PanicHook> = Arc::new(panic::take_hook());
        let chained = Arc::clone(&previous);
        panic::set_hook(Box::new(move |info| {
            if !info.payload().is::<Interrupted>() && !in_supervised_task() {
                log_panic(&logger, info);
            }
            (*chained)(info);
        }));

        Self { previous }
    }

    /// Restore the hook that was active before [`PanicHookRegistration::install`].
    ///
    /// # Panics
    ///
    /// Panics if called from a panicking thread.
    pub fn uninstall(self) {
        let _lock = HOOK_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        // Dropping our hook releases its clone of `previous`.
        drop(panic::take_hook());
        match Arc::try_unwrap(self.previous) {
            Ok(previous) => panic::set_hook(previous),
            Err(shared) => panic::set_hook(Box::new(move |info| (*shared)(info))),
        }
    }
}

fn log_panic(logger: &Logger, info: &PanicHookInfo<'_>) {
    let location = info.location().map_or_else(
        || SourceLocation::internal("panic_hook"),
        SourceLocation::caller,
    );
    let exception = ExceptionInfo::from_message("panic", payload_text(info.payload()))
        .with_backtrace(&Backtrace::force_capture());
    logger.root().emit(
        Level::Critical,
        location,
        "Unhandled exception",
        Some(exception),
        None,
    );
    logger.flush();
}

fn payload_text(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn in_supervised_task() -> bool {
    IN_SUPERVISED_TASK.with(Cell::get)
}

/// What an async failure report carries.
#[derive(Debug, Clone, Default)]
pub struct AsyncExceptionContext {
    /// Human-readable description.
    pub message: Option<String>,
    /// The failure itself, when there is one.
    pub exception: Option<ExceptionInfo>,
}

impl AsyncExceptionContext {
    /// Context with only a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            exception: None,
        }
    }

    /// Context for an error value.
    #[must_use]
    pub fn error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let exception = ExceptionInfo::from_error(error);
        Self {
            message: Some(exception.message.clone()),
            exception: Some(exception),
        }
    }

    fn panic(payload: &(dyn Any + Send)) -> Self {
        let text = payload_text(payload);
        Self {
            message: Some(text.clone()),
            exception: Some(ExceptionInfo::from_message("panic", text)),
        }
    }
}

/// Reports failures of tokio tasks through a logger.
///
/// Obtained from [`Logger::install_async_hook`] or
/// [`Logger::async_hook`]; both return `None` outside a tokio runtime.
#[derive(Clone, Debug)]
pub struct AsyncExceptionHook {
    logger: Logger,
    runtime: Handle,
}

impl AsyncExceptionHook {
    pub(crate) fn new(logger: Logger, runtime: Handle) -> Self {
        Self { logger, runtime }
    }

    /// The runtime of the calling context, if there is one.
    pub(crate) fn current_runtime() -> Option<Handle> {
        Handle::try_current().ok()
    }

    /// Hook for `logger` on the current runtime.
    ///
    /// Returns `None` outside a tokio runtime; the application may call
    /// this again once its runtime exists.
    #[must_use]
    pub fn install(logger: &Logger) -> Option<Self> {
        logger.install_async_hook()
    }

    /// Log a failure at ERROR as `Async exception: {message}`.
    pub fn handle(&self, context: AsyncExceptionContext) {
        let message = context
            .message
            .unwrap_or_else(|| "Async exception".to_string());
        self.logger.root().emit(
            Level::Error,
            SourceLocation::internal("async_exception_hook"),
            format!("Async exception: {message}"),
            context.exception,
            None,
        );
    }

    /// Spawn `future` on the hook's runtime.
    ///
    /// If the task panics the panic is logged through [`AsyncExceptionHook::handle`]
    /// and the handle resolves to `None`. Aborting the handle cancels the
    /// task without a report.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let hook = self.clone();
        self.runtime.spawn(async move {
            match AssertUnwindSafe(Supervised(Box::pin(future)))
                .catch_unwind()
                .await
            {
                Ok(output) => Some(output),
                Err(payload) => {
                    hook.handle(AsyncExceptionContext::panic(payload.as_ref()));
                    None
                },
            }
        })
    }
}

/// Marks the polling thread so the panic hook leaves the report to the
/// async hook.
struct Supervised<F>(Pin<Box<F>>);

impl<F: Future> Future for Supervised<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _mark = SupervisedMark::enter();
        self.0.as_mut().poll(cx)
    }
}

struct SupervisedMark {
    outer: bool,
}

impl SupervisedMark {
    fn enter() -> Self {
        Self {
            outer: IN_SUPERVISED_TASK.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for SupervisedMark {
    fn drop(&mut self) {
        IN_SUPERVISED_TASK.with(|flag| flag.set(self.outer));
    }
}
