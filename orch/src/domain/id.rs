//! Task identifiers and timestamps

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

/// Generate a new task ID
///
/// UUID v7 keeps IDs time-ordered, so directory listings sort by creation.
pub fn new_task_id() -> String {
    let id = uuid::Uuid::now_v7().to_string();
    debug!(%id, "new_task_id: generated");
    id
}

/// Current time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
