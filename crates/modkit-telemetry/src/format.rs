//! Record formatting.

use std::fmt::Write as _;

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::record::{ExceptionInfo, LogRecord};

/// Line template selection for the terminal sink.
///
/// File sinks always use [`FormatStyle::Full`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatStyle {
    /// `LEVEL: target:function:line | message | {context}`
    #[default]
    Simple,
    /// Simple plus timestamp, process name and thread name.
    Full,
}

/// How a sink turns a record into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFormat {
    /// Line template.
    pub style: FormatStyle,
    /// Wrap fields in ANSI colors.
    pub colorize: bool,
    /// Emit one JSON object per record instead of text.
    pub serialize: bool,
}

#[derive(Serialize)]
struct Serialized<'a> {
    text: &'a str,
    record: &'a LogRecord,
}

impl RecordFormat {
    /// Plain text with the given template.
    #[must_use]
    pub const fn plain(style: FormatStyle) -> Self {
        Self {
            style,
            colorize: false,
            serialize: false,
        }
    }

    /// Render a record, newline-terminated.
    ///
    /// Serialized output falls back to the plain line if JSON encoding fails.
    #[must_use]
    pub fn render(&self, record: &LogRecord) -> String {
        if self.serialize {
            let text = self.text(record, false);
            let json = serde_json::to_string(&Serialized {
                text: &text,
                record,
            });
            let mut out = json.unwrap_or(text);
            out.push('\n');
            return out;
        }
        let mut out = self.text(record, self.colorize);
        out.push('\n');
        out
    }

    fn text(&self, record: &LogRecord, colorize: bool) -> String {
        let level = record.level.as_str();
        let location = location(record);
        let context = serde_json::to_string(record.context.as_ref()).unwrap_or_default();

        let mut line = String::with_capacity(128);
        if colorize {
            let _ = write!(line, "{}: ", record.level.paint(level));
        } else {
            let _ = write!(line, "{level}: ");
        }

        if self.style == FormatStyle::Full {
            let time = record.timestamp.format("%Y-%m-%d %H:%M:%S");
            let origin = format!("{}:{}", record.process, record.thread);
            if colorize {
                let _ = write!(line, "{time} | {} | ", origin.cyan());
            } else {
                let _ = write!(line, "{time} | {origin} | ");
            }
        }

        if colorize {
            let _ = write!(line, "{}", location.magenta());
        } else {
            line.push_str(&location);
        }

        if colorize && self.style == FormatStyle::Full {
            let _ = write!(line, " | {} | {context}", record.level.paint(&record.message));
        } else {
            let _ = write!(line, " | {} | {context}", record.message);
        }

        if let Some(exception) = &record.exception {
            write_exception(&mut line, exception);
        }
        line
    }
}

fn location(record: &LogRecord) -> String {
    let loc = &record.location;
    let mut out = loc.target.clone();
    if let Some(function) = &loc.function {
        out.push(':');
        out.push_str(function);
    }
    if let Some(line) = loc.line {
        let _ = write!(out, ":{line}");
    }
    out
}

fn write_exception(out: &mut String, exception: &ExceptionInfo) {
    let _ = write!(out, "\n{}: {}", exception.type_name, exception.message);
    for cause in &exception.chain {
        let _ = write!(out, "\n  caused by: {cause}");
    }
    if let Some(debug) = &exception.debug {
        let _ = write!(out, "\n  debug: {debug}");
    }
    if let Some(backtrace) = &exception.backtrace {
        out.push('\n');
        out.push_str(backtrace.trim_end());
    }
}
