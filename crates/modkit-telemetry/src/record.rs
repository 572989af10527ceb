//! The record passed from the facade to every sink.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::level::Level;

/// Key/value context attached to records.
///
/// Ordered so formatted output is stable between runs.
pub type ContextMap = BTreeMap<String, serde_json::Value>;

/// Where a record was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    /// Module path or source file of the call site.
    pub target: String,
    /// Function name, when known (instrumentation wrappers know it).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Line number, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl SourceLocation {
    /// Location of a `#[track_caller]` call site.
    #[must_use]
    pub fn caller(location: &Location<'_>) -> Self {
        Self {
            target: module_from_file(location.file()),
            function: None,
            line: Some(location.line()),
        }
    }

    /// Location for records the facility emits about itself.
    #[must_use]
    pub(crate) fn internal(function: &str) -> Self {
        Self {
            target: env!("CARGO_CRATE_NAME").to_string(),
            function: Some(function.to_string()),
            line: None,
        }
    }

    /// Attach a function name.
    #[must_use]
    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}

/// `src/report/voucher.rs` -> `report::voucher`, `src/lib.rs` -> `lib`.
fn module_from_file(file: &str) -> String {
    let trimmed = file
        .strip_suffix(".rs")
        .unwrap_or(file)
        .replace('\\', "/");
    let relative = trimmed
        .rsplit_once("/src/")
        .map_or(trimmed.as_str(), |(_, rest)| rest)
        .trim_start_matches("src/");
    relative
        .strip_suffix("/mod")
        .unwrap_or(relative)
        .replace('/', "::")
}

/// Error details attached to a failure record.
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionInfo {
    /// Rust type name of the error or panic payload.
    pub type_name: String,
    /// `Display` output of the error.
    pub message: String,
    /// `Display` output of each `source()` in the chain.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
    /// `Debug` dump of the error. Only captured when `diagnose` is enabled,
    /// since field values may contain sensitive data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
    /// Captured backtrace, when the environment enables one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

impl ExceptionInfo {
    /// Build from an error value, walking its source chain.
    #[must_use]
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            chain,
            debug: Some(format!("{error:?}")),
            backtrace: None,
        }
        .with_backtrace(&Backtrace::capture())
    }

    /// Build from any displayable error (e.g. `anyhow::Error`), without a
    /// source chain.
    #[must_use]
    pub fn from_display<E>(error: &E) -> Self
    where
        E: fmt::Display + fmt::Debug + ?Sized,
    {
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            chain: Vec::new(),
            debug: Some(format!("{error:?}")),
            backtrace: None,
        }
    }

    /// Build from a plain message (panic payloads, async contexts without an error).
    #[must_use]
    pub fn from_message(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            chain: Vec::new(),
            debug: None,
            backtrace: None,
        }
    }

    /// Attach a backtrace if one was actually captured.
    #[must_use]
    pub fn with_backtrace(mut self, backtrace: &Backtrace) -> Self {
        if backtrace.status() == BacktraceStatus::Captured {
            self.backtrace = Some(backtrace.to_string());
        }
        self
    }

    /// Drop the debug dump. Applied to every record unless `diagnose` is set.
    pub(crate) fn without_debug(mut self) -> Self {
        self.debug = None;
        self
    }
}

/// One emitted event.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// Local time the record was created.
    pub timestamp: DateTime<Local>,
    /// Severity.
    pub level: Level,
    /// Call site.
    pub location: SourceLocation,
    /// Message text (already redacted by the time sinks see it).
    pub message: String,
    /// Bound context, facade base overlaid with the handle's own context.
    pub context: Arc<ContextMap>,
    /// Failure details, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    /// Elapsed time reported by instrumentation.
    #[serde(skip_serializing_if = "Option::is_none", with = "duration_secs")]
    pub duration: Option<Duration>,
    /// Executable name.
    pub process: &'static str,
    /// Name of the thread that created the record.
    pub thread: String,
}

impl LogRecord {
    /// Create a record stamped with the current time and thread.
    #[must_use]
    pub fn new(level: Level, location: SourceLocation, message: impl Into<String>) -> Self {
        let current = std::thread::current();
        Self {
            timestamp: Local::now(),
            level,
            location,
            message: message.into(),
            context: Arc::default(),
            exception: None,
            duration: None,
            process: process_name(),
            thread: current.name().unwrap_or("unnamed").to_string(),
        }
    }
}

/// Name of the running executable, computed once.
pub(crate) fn process_name() -> &'static str {
    static NAME: OnceLock<String> = OnceLock::new();
    NAME.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "main".to_string())
    })
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_f64(d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }
}
