//! Task persistence log and streaming feed
//!
//! - [`TaskStore`] - directory per task: meta, append-only message log, steps snapshot
//! - [`TaskFeed`] - backlog-then-live stream over one task's log
//! - [`LogEntry`] - one sequenced log line

mod entry;
mod feed;
mod log;

pub use entry::{EntryKind, LogEntry};
pub use feed::TaskFeed;
pub use log::{DEFAULT_BUS_CAPACITY, StoreError, TaskMeta, TaskStore};
