//! Directory-per-task persistence
//!
//! ```text
//! <data-dir>/<task-id>/meta.json       status and identity, overwritten on change
//! <data-dir>/<task-id>/messages.jsonl  append-only log entries
//! <data-dir>/<task-id>/steps.json      full steps collection, replaced via rename
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::entry::{EntryKind, LogEntry};
use crate::domain::{HistoryEntry, Role, StopReason, Task, TaskStatus, TaskStep, TaskSummary, now_ms};

const META_FILE: &str = "meta.json";
const MESSAGES_FILE: &str = "messages.jsonl";
const STEPS_FILE: &str = "steps.json";

/// Live entries buffered per subscriber before it starts lagging
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage JSON failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task not found: {0}")]
    NotFound(String),
}

/// Contents of `meta.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl From<&Task> for TaskMeta {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            goal: task.goal.clone(),
            status: task.status,
            created_at: task.created_at,
            updated_at: task.updated_at,
            depth: task.depth,
            parent_id: task.parent_id.clone(),
            error: task.error.clone(),
            stop_reason: task.stop_reason,
        }
    }
}

/// Task persistence log with an in-process fan-out of appended entries
pub struct TaskStore {
    root: PathBuf,
    bus: broadcast::Sender<LogEntry>,
    seqs: Mutex<HashMap<String, u64>>,
}

impl TaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(?root, "TaskStore::new: called");
        let (bus, _) = broadcast::channel(DEFAULT_BUS_CAPACITY);
        Self {
            root,
            bus,
            seqs: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    /// Receive every entry appended after this call, for all tasks
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        debug!(subscribers = self.bus.receiver_count(), "TaskStore::subscribe: called");
        self.bus.subscribe()
    }

    pub fn exists(&self, task_id: &str) -> bool {
        self.task_dir(task_id).join(META_FILE).is_file()
    }

    /// Persist a new task: meta, empty steps and its initial history
    pub async fn create(&self, task: &Task) -> Result<(), StoreError> {
        debug!(task_id = %task.id, "TaskStore::create: called");
        tokio::fs::create_dir_all(self.task_dir(&task.id)).await?;
        self.write_meta(task).await?;
        self.write_steps(&task.id, &task.steps).await?;
        for entry in &task.history {
            self.append_message(&task.id, entry.role, &entry.content).await?;
        }
        Ok(())
    }

    pub async fn append_message(&self, task_id: &str, role: Role, content: &str) -> Result<LogEntry, StoreError> {
        debug!(%task_id, %role, len = content.len(), "TaskStore::append_message: called");
        self.append(
            task_id,
            EntryKind::Message {
                role,
                content: content.to_string(),
            },
        )
        .await
    }

    /// Log the task's current status, then overwrite its meta
    pub async fn record_status(&self, task: &Task) -> Result<LogEntry, StoreError> {
        debug!(task_id = %task.id, status = %task.status, "TaskStore::record_status: called");
        let entry = self
            .append(
                &task.id,
                EntryKind::Status {
                    status: task.status,
                    error: task.error.clone(),
                    stop_reason: task.stop_reason,
                },
            )
            .await?;
        self.write_meta(task).await?;
        Ok(entry)
    }

    /// Replace the steps snapshot in full
    pub async fn write_steps(&self, task_id: &str, steps: &[TaskStep]) -> Result<(), StoreError> {
        debug!(%task_id, steps = steps.len(), "TaskStore::write_steps: called");
        let dir = self.task_dir(task_id);
        let json = serde_json::to_vec_pretty(steps)?;
        let tmp = dir.join(format!("{}.tmp", STEPS_FILE));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, dir.join(STEPS_FILE)).await?;
        Ok(())
    }

    /// Every entry in the task's log, in order
    pub async fn read_log(&self, task_id: &str) -> Result<Vec<LogEntry>, StoreError> {
        let path = self.task_dir(task_id).join(MESSAGES_FILE);
        debug!(?path, "TaskStore::read_log: called");
        if !self.exists(task_id) {
            return Err(StoreError::NotFound(task_id.to_string()));
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(%task_id, error = %e, "TaskStore::read_log: skipping unparseable line"),
            }
        }
        debug!(%task_id, count = entries.len(), "TaskStore::read_log: loaded entries");
        Ok(entries)
    }

    /// The last `n` entries of the task's log
    pub async fn tail(&self, task_id: &str, n: usize) -> Result<Vec<LogEntry>, StoreError> {
        let mut entries = self.read_log(task_id).await?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    pub async fn read_meta(&self, task_id: &str) -> Result<TaskMeta, StoreError> {
        let path = self.task_dir(task_id).join(META_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(task_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_steps(&self, task_id: &str) -> Result<Vec<TaskStep>, StoreError> {
        let path = self.task_dir(task_id).join(STEPS_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuild a task from meta, the steps snapshot and the message log
    pub async fn load(&self, task_id: &str) -> Result<Task, StoreError> {
        debug!(%task_id, "TaskStore::load: called");
        let meta = self.read_meta(task_id).await?;
        let steps = self.read_steps(task_id).await?;
        let history = self
            .read_log(task_id)
            .await?
            .iter()
            .filter_map(|entry| entry.as_message())
            .map(|(role, content)| HistoryEntry::new(role, content))
            .collect();

        Ok(Task {
            id: meta.id,
            goal: meta.goal,
            status: meta.status,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            history,
            steps,
            depth: meta.depth,
            parent_id: meta.parent_id,
            error: meta.error,
            stop_reason: meta.stop_reason,
        })
    }

    /// Summaries of every persisted task, newest first
    pub async fn list(&self) -> Result<Vec<TaskSummary>, StoreError> {
        debug!(root = ?self.root, "TaskStore::list: called");
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let task_id = item.file_name().to_string_lossy().to_string();
            match self.load(&task_id).await {
                Ok(task) => summaries.push(task.summary()),
                Err(e) => warn!(%task_id, error = %e, "TaskStore::list: skipping unreadable task"),
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(summaries)
    }

    async fn write_meta(&self, task: &Task) -> Result<(), StoreError> {
        let dir = self.task_dir(&task.id);
        let json = serde_json::to_vec_pretty(&TaskMeta::from(task))?;
        let tmp = dir.join(format!("{}.tmp", META_FILE));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, dir.join(META_FILE)).await?;
        Ok(())
    }

    async fn append(&self, task_id: &str, kind: EntryKind) -> Result<LogEntry, StoreError> {
        let seq = self.next_seq(task_id).await?;
        let entry = LogEntry {
            seq,
            ts: now_ms(),
            task_id: task_id.to_string(),
            kind,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let path = self.task_dir(task_id).join(MESSAGES_FILE);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        // No subscribers is fine
        let _ = self.bus.send(entry.clone());
        Ok(entry)
    }

    /// Next sequence number, resuming from the log on first use
    async fn next_seq(&self, task_id: &str) -> Result<u64, StoreError> {
        let known = self.seqs.lock().map(|seqs| seqs.contains_key(task_id)).unwrap_or(false);
        let resumed = if known { 0 } else { self.last_persisted_seq(task_id).await? };

        let mut seqs = self.seqs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let seq = seqs.entry(task_id.to_string()).or_insert(resumed);
        *seq += 1;
        Ok(*seq)
    }

    async fn last_persisted_seq(&self, task_id: &str) -> Result<u64, StoreError> {
        let path = self.task_dir(task_id).join(MESSAGES_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let last = content
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<LogEntry>(line).ok())
            .map(|entry| entry.seq)
            .unwrap_or(0);
        debug!(%task_id, last, "TaskStore::last_persisted_seq: resumed");
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionKind, PlannedAction};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_writes_initial_history() {
        let dir = tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let task = Task::new("list files");
        store.create(&task).await.unwrap();

        assert!(store.exists(&task.id));
        let log = store.read_log(&task.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].seq, 1);
        assert_eq!(log[0].as_message(), Some((Role::User, "list files")));
    }

    #[tokio::test]
    async fn test_seq_is_monotonic_and_tail_is_bounded() {
        let dir = tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let task = Task::new("x");
        store.create(&task).await.unwrap();
        for i in 0..5 {
            store.append_message(&task.id, Role::System, &format!("m{}", i)).await.unwrap();
        }

        let log = store.read_log(&task.id).await.unwrap();
        let seqs: Vec<u64> = log.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);

        let tail = store.tail(&task.id, 2).await.unwrap();
        assert_eq!(tail.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![5, 6]);
        assert_eq!(store.tail(&task.id, 100).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_seq_resumes_after_reopen() {
        let dir = tempdir().unwrap();
        let task = Task::new("x");
        {
            let store = TaskStore::new(dir.path());
            store.create(&task).await.unwrap();
            store.append_message(&task.id, Role::System, "before").await.unwrap();
        }
        let store = TaskStore::new(dir.path());
        let entry = store.append_message(&task.id, Role::System, "after").await.unwrap();
        assert_eq!(entry.seq, 3);
    }

    #[tokio::test]
    async fn test_load_reconstructs_task() {
        let dir = tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = Task::new("build it");
        store.create(&task).await.unwrap();

        task.transition(TaskStatus::Running).unwrap();
        store.record_status(&task).await.unwrap();
        task.push_step(TaskStep::new(1, PlannedAction::new(ActionKind::RunShell, json!({"script": "ls"}))));
        store.write_steps(&task.id, &task.steps).await.unwrap();
        task.push_history(Role::Planner, "{\"action\":\"run_shell\"}");
        store.append_message(&task.id, Role::Planner, "{\"action\":\"run_shell\"}").await.unwrap();
        task.error = Some("boom".to_string());
        task.transition(TaskStatus::Error).unwrap();
        store.record_status(&task).await.unwrap();

        let loaded = store.load(&task.id).await.unwrap();
        assert_eq!(loaded.status, TaskStatus::Error);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
        assert_eq!(loaded.history, task.history);
        assert_eq!(loaded.steps, task.steps);
    }

    #[tokio::test]
    async fn test_append_publishes_on_bus() {
        let dir = tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let task = Task::new("x");
        store.create(&task).await.unwrap();

        let mut rx = store.subscribe();
        store.append_message(&task.id, Role::Assistant, "hello").await.unwrap();
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.seq, 2);
        assert_eq!(entry.as_message(), Some((Role::Assistant, "hello")));
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found() {
        let dir = tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        assert!(matches!(store.load("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.read_log("nope").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dir = tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let mut older = Task::new("older");
        older.created_at = 1_000;
        let mut newer = Task::new("newer");
        newer.created_at = 2_000;
        store.create(&older).await.unwrap();
        store.create(&newer).await.unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].goal, "newer");
        assert_eq!(list[1].goal, "older");
    }

    #[tokio::test]
    async fn test_list_on_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let store = TaskStore::new(dir.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
