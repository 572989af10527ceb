//! Severity levels.

use std::fmt;
use std::str::FromStr;

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;

/// Ordered record severity.
///
/// A sink with minimum level `L` admits every record whose level is `>= L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    /// Finest-grained diagnostics.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal operational messages.
    Info,
    /// An operation completed successfully.
    Success,
    /// Something unexpected that did not stop the operation.
    Warning,
    /// An operation failed.
    Error,
    /// The process is unlikely to continue.
    Critical,
}

impl Level {
    /// All levels, lowest severity first.
    pub const ALL: [Self; 7] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Success,
        Self::Warning,
        Self::Error,
        Self::Critical,
    ];

    /// Upper-case display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Wrap `text` in this level's terminal color.
    pub(crate) fn paint(self, text: &str) -> ColoredString {
        match self {
            Self::Trace => text.cyan().bold(),
            Self::Debug => text.blue().bold(),
            Self::Info => text.cyan(),
            Self::Success => text.green().bold(),
            Self::Warning => text.yellow().bold(),
            Self::Error => text.red().bold(),
            Self::Critical => text.white().on_red().bold(),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "SUCCESS" => Ok(Self::Success),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            _ => Err(TelemetryError::ConfigError(format!(
                "unknown log level: {s:?}"
            ))),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        for pair in Level::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(Level::Success > Level::Info);
        assert!(Level::Success < Level::Warning);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("Success".parse::<Level>().unwrap(), Level::Success);
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warning);
    }

    #[test]
    fn test_unknown_level_names_value() {
        let err = "verbose".parse::<Level>().unwrap_err();
        assert!(matches!(err, TelemetryError::ConfigError(_)));
        assert!(err.to_string().contains("verbose"));
    }

    #[test]
    fn test_from_tracing_level() {
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warning);
        assert_eq!(Level::from(tracing::Level::TRACE), Level::Trace);
    }

    #[test]
    fn test_serde_uses_upper_case_names() {
        let json = serde_json::to_string(&Level::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        let parsed: Level = serde_json::from_str("\"SUCCESS\"").unwrap();
        assert_eq!(parsed, Level::Success);
    }
}
