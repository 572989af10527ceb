//! Message redaction.
//!
//! Before a record is formatted its message is scanned, case-insensitively,
//! for a fixed set of keywords. Any hit replaces the *whole* message with
//! [`REDACTED_MARKER`].
//!
//! # Limitations
//!
//! This is a best-effort heuristic, not a security boundary:
//! - only the message text is inspected; bound context values and exception
//!   payloads are emitted as-is, so never put secrets there;
//! - encoded, split or obfuscated secrets (base64, hex, `p-a-s-s`) are not
//!   detected;
//! - any message that merely mentions a keyword ("token refreshed") is
//!   redacted too.

use crate::record::LogRecord;

/// Replacement text for redacted messages.
pub const REDACTED_MARKER: &str = "[REDACTED]";

/// Keywords that trigger redaction (matched as lower-case substrings).
pub const SENSITIVE_KEYWORDS: [&str; 5] = ["password", "token", "secret", "apikey", "authorization"];

/// Whether `message` contains any sensitive keyword.
#[must_use]
pub fn is_sensitive(message: &str) -> bool {
    let lowered = message.to_lowercase();
    SENSITIVE_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Mask the record's message in place if it looks sensitive.
///
/// Returns `true` when the message was replaced.
pub fn redact(record: &mut LogRecord) -> bool {
    if is_sensitive(&record.message) {
        REDACTED_MARKER.clone_into(&mut record.message);
        true
    } else {
        false
    }
}
