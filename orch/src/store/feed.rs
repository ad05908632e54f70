//! Live task feed
//!
//! A read-only projection over the message log: the recent backlog from disk,
//! then entries pushed on the store's bus as they are appended.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::entry::LogEntry;
use super::log::{StoreError, TaskStore};

/// Ordered stream of one task's log entries
///
/// Ends after yielding a terminal status entry, or right after the backlog
/// when the task had already finished.
pub struct TaskFeed {
    inner: BoxStream<'static, LogEntry>,
}

impl TaskFeed {
    /// Open a feed starting with the last `tail` persisted entries
    pub async fn open(store: &TaskStore, task_id: &str, tail: usize) -> Result<Self, StoreError> {
        debug!(%task_id, tail, "TaskFeed::open: called");
        // Subscribe before reading so nothing appended in between is lost
        let mut rx = store.subscribe();
        let backlog = store.tail(task_id, tail).await?;
        let finished = backlog.iter().any(LogEntry::is_terminal)
            || (backlog.is_empty() && store.read_meta(task_id).await?.status.is_terminal());
        let mut last_seq = backlog.last().map(|e| e.seq).unwrap_or(0);
        let task_id = task_id.to_string();
        debug!(%task_id, backlog = backlog.len(), finished, "TaskFeed::open: backlog read");

        let inner = async_stream::stream! {
            for entry in backlog {
                yield entry;
            }
            if finished {
                return;
            }

            loop {
                match rx.recv().await {
                    Ok(entry) => {
                        if entry.task_id != task_id || entry.seq <= last_seq {
                            continue;
                        }
                        last_seq = entry.seq;
                        let terminal = entry.is_terminal();
                        yield entry;
                        if terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%task_id, skipped = n, "TaskFeed: lagged behind, entries dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(%task_id, "TaskFeed: bus closed");
                        break;
                    }
                }
            }
        };

        Ok(Self { inner: Box::pin(inner) })
    }
}

impl Stream for TaskFeed {
    type Item = LogEntry;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Role, Task, TaskStatus};
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_backlog_then_live_entries() {
        let dir = tempdir().unwrap();
        let store = Arc::new(TaskStore::new(dir.path()));
        let mut task = Task::new("goal");
        store.create(&task).await.unwrap();
        for i in 0..4 {
            store.append_message(&task.id, Role::System, &format!("old{}", i)).await.unwrap();
        }

        let mut feed = TaskFeed::open(&store, &task.id, 2).await.unwrap();
        let first = feed.next().await.unwrap();
        let second = feed.next().await.unwrap();
        assert_eq!((first.seq, second.seq), (4, 5));

        let writer = store.clone();
        let id = task.id.clone();
        task.transition(TaskStatus::Running).unwrap();
        let handle = tokio::spawn(async move {
            writer.append_message(&id, Role::Assistant, "live").await.unwrap();
            writer.record_status(&task).await.unwrap();
            task.transition(TaskStatus::Done).unwrap();
            writer.record_status(&task).await.unwrap();
        });

        let rest: Vec<LogEntry> = tokio::time::timeout(Duration::from_secs(5), feed.collect())
            .await
            .unwrap();
        handle.await.unwrap();

        let seqs: Vec<u64> = rest.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![6, 7, 8]);
        assert_eq!(rest[0].as_message(), Some((Role::Assistant, "live")));
        assert!(rest[2].is_terminal());
    }

    #[tokio::test]
    async fn test_finished_task_ends_after_backlog() {
        let dir = tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = Task::new("goal");
        store.create(&task).await.unwrap();
        task.transition(TaskStatus::Running).unwrap();
        store.record_status(&task).await.unwrap();
        task.transition(TaskStatus::Stopped).unwrap();
        store.record_status(&task).await.unwrap();

        let feed = TaskFeed::open(&store, &task.id, 20).await.unwrap();
        let entries: Vec<LogEntry> = tokio::time::timeout(Duration::from_secs(5), feed.collect())
            .await
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_other_tasks_are_filtered_out() {
        let dir = tempdir().unwrap();
        let store = Arc::new(TaskStore::new(dir.path()));
        let mut watched = Task::new("watched");
        let other = Task::new("other");
        store.create(&watched).await.unwrap();
        store.create(&other).await.unwrap();

        let mut feed = TaskFeed::open(&store, &watched.id, 0).await.unwrap();
        store.append_message(&other.id, Role::System, "noise").await.unwrap();
        watched.transition(TaskStatus::Running).unwrap();
        store.record_status(&watched).await.unwrap();

        let entry = tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.task_id, watched.id);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let dir = tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        assert!(matches!(
            TaskFeed::open(&store, "missing", 5).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
