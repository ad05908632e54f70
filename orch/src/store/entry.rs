//! Message log entry types

use serde::{Deserialize, Serialize};

use crate::domain::{Role, StopReason, TaskStatus};

/// One line of a task's `messages.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Per-task sequence number, starting at 1
    pub seq: u64,
    /// Unix milliseconds
    pub ts: i64,
    pub task_id: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Message {
        role: Role,
        content: String,
    },
    Status {
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<StopReason>,
    },
}

impl LogEntry {
    /// True for a status entry carrying a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(&self.kind, EntryKind::Status { status, .. } if status.is_terminal())
    }

    pub fn as_message(&self) -> Option<(Role, &str)> {
        match &self.kind {
            EntryKind::Message { role, content } => Some((*role, content.as_str())),
            EntryKind::Status { .. } => None,
        }
    }
}
