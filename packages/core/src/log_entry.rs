//! Structured worker log entries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Outcome transcript of a handled work item.
    Log,
    /// A failure, kept permanently for auditing.
    Error,
}

/// A log entry attributed to the emitting worker.
///
/// Wire format: `{"id", "kind": "log" | "error", "success", "message"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Identity of the emitting worker.
    pub id: String,
    pub kind: LogKind,
    pub success: bool,
    pub message: String,
}

impl LogEntry {
    pub fn log(worker_id: impl Into<String>, success: bool, message: impl Into<String>) -> Self {
        Self {
            id: worker_id.into(),
            kind: LogKind::Log,
            success,
            message: message.into(),
        }
    }

    /// An error entry; `step` names the stage that failed.
    pub fn error(worker_id: impl Into<String>, step: &str, message: impl std::fmt::Display) -> Self {
        Self {
            id: worker_id.into(),
            kind: LogKind::Error,
            success: false,
            message: format!("{step}: {message}"),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == LogKind::Error
    }
}
