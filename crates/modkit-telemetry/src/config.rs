//! Logging configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{TelemetryError, TelemetryResult};
use crate::format::FormatStyle;
use crate::level::Level;
use crate::record::ContextMap;

/// Configuration for one [`Logger::configure`](crate::Logger::configure) call.
///
/// Every field has a default, so a TOML or JSON fragment only needs the
/// fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    /// Minimum level for the terminal sink (`TRACE` .. `CRITICAL`).
    #[serde(default = "default_level")]
    pub level: String,
    /// Write to standard error.
    #[serde(default = "default_true")]
    pub to_terminal: bool,
    /// Write `{name_prefix}_info.log` and `{name_prefix}_error.log`.
    #[serde(default)]
    pub to_file: bool,
    /// Emit one JSON object per record.
    #[serde(default)]
    pub serialize: bool,
    /// Include `Debug` dumps of errors. May leak field values.
    #[serde(default)]
    pub diagnose: bool,
    /// Write through a background worker per sink.
    #[serde(default = "default_true")]
    pub enqueue: bool,
    /// Directory for log files.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// File name prefix.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Rotate files once they reach this many megabytes.
    #[serde(default = "default_size_mb")]
    pub size_mb: u64,
    /// Delete rotated files older than this many days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// Route the redirectable stdout/stderr handles through the logger.
    #[serde(default)]
    pub override_stdout: bool,
    /// Terminal line template.
    #[serde(default)]
    pub format_style: FormatStyle,
    /// Context merged into every record.
    #[serde(default)]
    pub bind_context: ContextMap,
    /// Install the panic hook (and the async hook if a runtime is running).
    #[serde(default = "default_true")]
    pub enable_exception_hooks: bool,
    /// Colorize terminal output.
    #[serde(default = "default_true")]
    pub ansi: bool,
    /// Forward events from the `tracing` ecosystem into this logger.
    #[serde(default = "default_true")]
    pub intercept_tracing: bool,
}

fn default_level() -> String {
    "INFO".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logs")
}

fn default_name_prefix() -> String {
    "app".to_string()
}

fn default_size_mb() -> u64 {
    10
}

fn default_retention_days() -> u64 {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            to_terminal: true,
            to_file: false,
            serialize: false,
            diagnose: false,
            enqueue: true,
            log_path: default_log_path(),
            name_prefix: default_name_prefix(),
            size_mb: default_size_mb(),
            retention_days: default_retention_days(),
            override_stdout: false,
            format_style: FormatStyle::default(),
            bind_context: ContextMap::new(),
            enable_exception_hooks: true,
            ansi: true,
            intercept_tracing: true,
        }
    }
}

impl LogConfig {
    /// Create a new log config with the specified level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Parse a config from TOML.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the text is not valid TOML for this
    /// struct. Field values are checked later, by [`LogConfig::validate`].
    pub fn from_toml_str(text: &str) -> TelemetryResult<Self> {
        toml::from_str(text).map_err(|e| TelemetryError::ConfigError(e.to_string()))
    }

    /// Set the terminal line template.
    #[must_use]
    pub fn with_format(mut self, style: FormatStyle) -> Self {
        self.format_style = style;
        self
    }

    /// Enable file logging into `directory` with the given name prefix.
    #[must_use]
    pub fn with_file_logging(
        mut self,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        self.to_file = true;
        self.log_path = directory.into();
        self.name_prefix = prefix.into();
        self
    }

    /// Set the rotation size and retention window for log files.
    #[must_use]
    pub fn with_rotation(mut self, size_mb: u64, retention_days: u64) -> Self {
        self.size_mb = size_mb;
        self.retention_days = retention_days;
        self
    }

    /// Add a context entry merged into every record.
    #[must_use]
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.bind_context.insert(key.into(), value.into());
        self
    }

    /// Disable terminal output.
    #[must_use]
    pub fn without_terminal(mut self) -> Self {
        self.to_terminal = false;
        self
    }

    /// Write directly on the calling thread instead of through a worker.
    #[must_use]
    pub fn without_enqueue(mut self) -> Self {
        self.enqueue = false;
        self
    }

    /// Disable ANSI colors.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    /// Do not install the panic or async exception hooks.
    #[must_use]
    pub fn without_exception_hooks(mut self) -> Self {
        self.enable_exception_hooks = false;
        self
    }

    /// Do not install the `tracing` bridge.
    #[must_use]
    pub fn without_tracing_bridge(mut self) -> Self {
        self.intercept_tracing = false;
        self
    }

    /// Emit JSON records.
    #[must_use]
    pub fn with_serialize(mut self) -> Self {
        self.serialize = true;
        self
    }

    /// Include error `Debug` dumps in records.
    #[must_use]
    pub fn with_diagnose(mut self) -> Self {
        self.diagnose = true;
        self
    }

    /// Redirect the stdout/stderr handles into the logger.
    #[must_use]
    pub fn with_stdout_override(mut self) -> Self {
        self.override_stdout = true;
        self
    }

    /// Check every field and return the parsed terminal level.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::ConfigError`] naming the first offending value.
    pub fn validate(&self) -> TelemetryResult<Level> {
        let level = self.level.parse::<Level>()?;

        if self.to_file {
            if self.log_path.as_os_str().is_empty() {
                return Err(TelemetryError::ConfigError(
                    "log_path must not be empty".to_string(),
                ));
            }
            if self.name_prefix.is_empty() {
                return Err(TelemetryError::ConfigError(
                    "name_prefix must not be empty".to_string(),
                ));
            }
            if self.name_prefix.contains(['/', '\\']) || self.name_prefix.contains("..") {
                return Err(TelemetryError::ConfigError(format!(
                    "name_prefix must be a plain file name: {:?}",
                    self.name_prefix
                )));
            }
            if self.size_mb == 0 {
                return Err(TelemetryError::ConfigError(
                    "size_mb must be at least 1".to_string(),
                ));
            }
            if self.retention_days == 0 {
                return Err(TelemetryError::ConfigError(
                    "retention_days must be at least 1".to_string(),
                ));
            }
        }

        Ok(level)
    }
}
