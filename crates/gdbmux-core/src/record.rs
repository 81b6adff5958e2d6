//! GDB/MI result-record classification.
//!
//! The machine interface answers each command with a result record: a line
//! starting with `^` followed by a status token, then emits a literal
//! `(gdb)` prompt line once it is ready for the next command. Everything
//! else on stdout (console streams, async notifications, the startup
//! banner) is free-form and classified as [`Record::Unclassified`].

use serde::Serialize;

/// First character of a result record.
pub const RESULT_PREFIX: char = '^';

/// Literal prompt line signalling readiness for the next command.
pub const PROMPT: &str = "(gdb)";

/// Classification of one decoded, trimmed line of debugger output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Record {
    /// `^done`, with any trailing result payload (e.g. `,value="42"`).
    Done { data: String },
    /// `^running` — the inferior resumed.
    Running,
    /// `^connected` — attached to a remote target.
    Connected,
    /// `^error`, with the `msg="…"` content when present.
    Error { message: String },
    /// `^exit` — the debugger is terminating.
    #[serde(rename = "exit")]
    ProcessExited,
    /// Anything that is not a recognized result record, carried verbatim.
    #[serde(rename = "unknown")]
    Unclassified { data: String },
}

impl Record {
    /// Classify one line of debugger output.
    ///
    /// Total: never fails, unrecognized input becomes `Unclassified`.
    pub fn parse(line: &str) -> Record {
        if !line.starts_with(RESULT_PREFIX) {
            return Record::Unclassified {
                data: line.to_string(),
            };
        }

        if let Some(rest) = line.strip_prefix("^done") {
            Record::Done {
                data: rest.trim().to_string(),
            }
        } else if line.starts_with("^running") {
            Record::Running
        } else if line.starts_with("^connected") {
            Record::Connected
        } else if let Some(rest) = line.strip_prefix("^error") {
            Record::Error {
                message: extract_error_message(rest),
            }
        } else if line.starts_with("^exit") {
            Record::ProcessExited
        } else {
            Record::Unclassified {
                data: line.to_string(),
            }
        }
    }

    /// Whether this record is an authoritative command result.
    pub fn is_result(&self) -> bool {
        !matches!(self, Record::Unclassified { .. })
    }
}

/// Pull the message out of an `^error` remainder.
///
/// Prefers the quoted `msg="…"` field; falls back to the trimmed trailing
/// text when the field is absent or malformed.
fn extract_error_message(rest: &str) -> String {
    if let Some(start) = rest.find("msg=\"") {
        let quoted = &rest[start + 5..];
        if let Some(end) = quoted.find('"') {
            return quoted[..end].to_string();
        }
    }
    rest.trim().to_string()
}
