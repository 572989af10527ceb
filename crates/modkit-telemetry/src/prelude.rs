//! Prelude module - commonly used types for convenient import.
//!
//! Use `use modkit_telemetry::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust,no_run
//! use modkit_telemetry::prelude::*;
//!
//! # fn main() -> TelemetryResult<()> {
//! static LOGGING: SetupGuard = SetupGuard::new();
//! let _flush = LOGGING.run_once(|| setup_logging(&LogConfig::new("info")))?;
//!
//! let ctx = RequestContext::new("dashboard").with_operation("voucher_report");
//! let log = ctx.bind_to(global());
//! let _scope = log.scope("query");
//! log.success("report ready");
//! # Ok(())
//! # }
//! ```

// Errors
pub use crate::{TelemetryError, TelemetryResult};

// Configuration
pub use crate::{FormatStyle, Level, LogConfig};

// Facade and setup
pub use crate::{
    BoundLogger, FlushGuard, Logger, SetupGuard, global, log_error, setup_default_logging,
    setup_logging,
};

// Instrumentation
pub use crate::{ScopeGuard, Timer, Traced, log_block};

// Request context
pub use crate::{RequestContext, RequestGuard, request_id};
