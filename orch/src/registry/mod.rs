//! Task registry
//!
//! The one structure shared across task loops. Each entry holds the latest
//! snapshot a loop published, plus the handle and stop signal of the loop
//! that owns it. The lock guards only insert and lookup and is never held
//! across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{Task, TaskSummary};

#[derive(Debug)]
struct Entry {
    snapshot: Task,
    handle: Option<JoinHandle<()>>,
    stop: Option<watch::Sender<bool>>,
}

/// Cloneable handle to the process-wide task map
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store the latest snapshot of a task, inserting it if unknown
    pub fn publish(&self, task: &Task) {
        debug!(task_id = %task.id, status = %task.status, steps = task.steps.len(), "TaskRegistry::publish: called");
        let mut entries = self.entries();
        match entries.get_mut(&task.id) {
            Some(entry) => entry.snapshot = task.clone(),
            None => {
                entries.insert(
                    task.id.clone(),
                    Entry {
                        snapshot: task.clone(),
                        handle: None,
                        stop: None,
                    },
                );
            }
        }
    }

    /// Attach the running loop of a registered task
    ///
    /// Returns false if the task is unknown or already has a loop.
    pub fn attach(&self, task_id: &str, handle: JoinHandle<()>, stop: watch::Sender<bool>) -> bool {
        debug!(%task_id, "TaskRegistry::attach: called");
        let mut entries = self.entries();
        match entries.get_mut(task_id) {
            Some(entry) if entry.handle.is_none() => {
                entry.handle = Some(handle);
                entry.stop = Some(stop);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.entries().get(task_id).map(|entry| entry.snapshot.clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries().contains_key(task_id)
    }

    /// Summaries of every registered task, newest first
    pub fn list(&self) -> Vec<TaskSummary> {
        let mut summaries: Vec<TaskSummary> = self.entries().values().map(|entry| entry.snapshot.summary()).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        summaries
    }

    /// Signal the task's loop to stop
    ///
    /// Returns false if the task has no loop of its own or already finished.
    pub fn stop(&self, task_id: &str) -> bool {
        let entries = self.entries();
        let Some(entry) = entries.get(task_id) else {
            return false;
        };
        if entry.snapshot.status.is_terminal() {
            debug!(%task_id, "TaskRegistry::stop: already terminal");
            return false;
        }
        match &entry.stop {
            Some(stop) => {
                info!(%task_id, "Stop requested");
                stop.send(true).is_ok()
            }
            None => false,
        }
    }

    /// Take the loop handle so the caller can await it
    pub fn take_handle(&self, task_id: &str) -> Option<JoinHandle<()>> {
        self.entries().get_mut(task_id).and_then(|entry| entry.handle.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;

    #[test]
    fn test_publish_inserts_then_updates() {
        let registry = TaskRegistry::new();
        let mut task = Task::new("x");
        registry.publish(&task);
        assert_eq!(registry.get(&task.id).unwrap().status, TaskStatus::Queued);

        task.transition(TaskStatus::Running).unwrap();
        registry.publish(&task);
        assert_eq!(registry.get(&task.id).unwrap().status, TaskStatus::Running);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_list_newest_first() {
        let registry = TaskRegistry::new();
        let mut a = Task::new("a");
        a.created_at = 10;
        let mut b = Task::new("b");
        b.created_at = 20;
        registry.publish(&a);
        registry.publish(&b);
        let goals: Vec<String> = registry.list().into_iter().map(|s| s.goal).collect();
        assert_eq!(goals, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_attach_once_and_stop() {
        let registry = TaskRegistry::new();
        let mut task = Task::new("x");
        task.transition(TaskStatus::Running).unwrap();
        registry.publish(&task);

        let (stop_tx, mut stop_rx) = watch::channel(false);
        assert!(registry.attach(&task.id, tokio::spawn(async {}), stop_tx));

        let (again_tx, _) = watch::channel(false);
        assert!(!registry.attach(&task.id, tokio::spawn(async {}), again_tx));

        assert!(registry.stop(&task.id));
        stop_rx.changed().await.unwrap();
        assert!(*stop_rx.borrow());

        let handle = registry.take_handle(&task.id).unwrap();
        handle.await.unwrap();
        assert!(registry.take_handle(&task.id).is_none());
    }

    #[test]
    fn test_stop_unknown_or_finished() {
        let registry = TaskRegistry::new();
        assert!(!registry.stop("missing"));

        let mut task = Task::new("x");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Done).unwrap();
        registry.publish(&task);
        assert!(!registry.stop(&task.id));
    }

    #[test]
    fn test_clones_share_state() {
        let registry = TaskRegistry::new();
        let other = registry.clone();
        let task = Task::new("shared");
        registry.publish(&task);
        assert!(other.contains(&task.id));
    }
}
