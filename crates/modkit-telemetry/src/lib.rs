//! Modkit Telemetry - Logging for the modkit dashboard services.
//!
//! This crate provides:
//! - A logging facade with a colorized terminal sink and rotating,
//!   per-severity log files
//! - Bound key/value context and request correlation
//! - Redaction of messages that mention credentials
//! - Timing and entry/exit instrumentation for functions and blocks
//! - Panic and async-task exception hooks
//! - Capture of `tracing` events and redirectable stdout/stderr
//!
//! # Example
//!
//! ```rust,no_run
//! use modkit_telemetry::{LogConfig, Timer, global, log_block, setup_logging};
//!
//! # fn load_vouchers() -> Result<Vec<u32>, std::io::Error> { Ok(vec![]) }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LogConfig::new("debug")
//!     .with_file_logging("logs", "dashboard")
//!     .with_context("app", "modkit");
//!
//! // Keep the guard until the end of `main` so queued records reach disk.
//! let _flush = setup_logging(&config)?;
//!
//! let log = global().with("user", "alice");
//! log.info("report requested");
//!
//! let vouchers = Timer::new(&log, "load_vouchers").call(load_vouchers)?;
//! log_block(&log, "render", || {
//!     log.debug(format!("{} vouchers", vouchers.len()));
//!     Ok::<_, std::io::Error>(())
//! })?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod hooks;
pub mod intercept;
pub mod prelude;
pub mod redact;
pub mod sink;

mod config;
mod context;
mod error;
mod format;
mod instrument;
mod level;
mod logger;
mod record;
mod setup;

#[cfg(test)]
mod testing;

pub use config::LogConfig;
pub use context::{RequestContext, RequestGuard, request_id};
pub use error::{TelemetryError, TelemetryResult};
pub use format::{FormatStyle, RecordFormat};
pub use hooks::{AsyncExceptionContext, AsyncExceptionHook, Interrupted, PanicHookRegistration};
pub use instrument::{ScopeGuard, Timer, Traced, log_block, log_block_at};
pub use intercept::{StreamAdapter, StreamRedirect, TracingBridge};
pub use level::Level;
pub use logger::{BoundLogger, Logger};
pub use record::{ContextMap, ExceptionInfo, LogRecord, SourceLocation};
pub use setup::{
    FlushGuard, SetupGuard, global, log_error, log_exception_with_caller, setup_default_logging,
    setup_logging, shutdown,
};
pub use sink::{Sink, SinkKind, WriterSink};
