//! Task domain type
//!
//! A task is one automation goal under execution. It is exclusively owned by
//! the engine loop running it; every other component sees snapshots.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::id::{new_task_id, now_ms};
use super::step::TaskStep;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, loop not yet started
    #[default]
    Queued,
    /// Loop is iterating
    Running,
    /// Passed the verification gate
    Done,
    /// Planner or dispatch failure
    Error,
    /// Step budget exhausted or cancelled
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error | TaskStatus::Stopped)
    }

    /// Legal moves: queued -> running -> {done, error, stopped}
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Done)
                | (TaskStatus::Running, TaskStatus::Error)
                | (TaskStatus::Running, TaskStatus::Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
            TaskStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a task ended in `stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StepBudgetExhausted,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::StepBudgetExhausted => write!(f, "step_budget_exhausted"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Speaker of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
    Assistant,
    Planner,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::System => "system",
            Role::Assistant => "assistant",
            Role::Planner => "planner",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One automation goal under execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub status: TaskStatus,

    /// Unix milliseconds
    pub created_at: i64,
    pub updated_at: i64,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    #[serde(default)]
    pub steps: Vec<TaskStep>,

    /// 0 for top-level tasks
    #[serde(default)]
    pub depth: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

impl Task {
    /// Create a queued top-level task whose history starts with the goal
    pub fn new(goal: impl Into<String>) -> Self {
        let goal = goal.into();
        debug!(%goal, "Task::new: called");
        let now = now_ms();
        Self {
            id: new_task_id(),
            history: vec![HistoryEntry::new(Role::User, goal.clone())],
            goal,
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            steps: Vec::new(),
            depth: 0,
            parent_id: None,
            error: None,
            stop_reason: None,
        }
    }

    /// Create a queued sub-task one level below `parent`
    pub fn child_of(parent: &Task, goal: impl Into<String>) -> Self {
        let mut task = Self::new(goal);
        task.depth = parent.depth + 1;
        task.parent_id = Some(parent.id.clone());
        debug!(task_id = %task.id, parent_id = %parent.id, depth = task.depth, "Task::child_of: called");
        task
    }

    /// Move to `next`, rejecting anything outside the lifecycle graph
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), TransitionError> {
        debug!(task_id = %self.id, from = %self.status, to = %next, "Task::transition: called");
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn push_history(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(HistoryEntry::new(role, content));
        self.touch();
    }

    /// Append a step, returning its position in `steps`
    pub fn push_step(&mut self, step: TaskStep) -> usize {
        self.steps.push(step);
        self.touch();
        self.steps.len() - 1
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms().max(self.updated_at);
    }

    pub fn has_screenshots(&self) -> bool {
        self.steps.iter().any(|s| s.screenshot.is_some())
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            goal: self.goal.clone(),
            status: self.status,
            created_at: self.created_at,
            steps: self.steps.len(),
            has_screenshots: self.has_screenshots(),
            depth: self.depth,
            parent_id: self.parent_id.clone(),
        }
    }
}

/// Compact list-view projection of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub created_at: i64,
    pub steps: usize,
    pub has_screenshots: bool,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionKind, PlannedAction};
    use proptest::prelude::*;
    use serde_json::json;

    const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Done,
        TaskStatus::Error,
        TaskStatus::Stopped,
    ];

    #[test]
    fn test_new_task_is_queued_with_goal_in_history() {
        let task = Task::new("list files");
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.history, vec![HistoryEntry::new(Role::User, "list files")]);
        assert_eq!(task.depth, 0);
        assert!(task.parent_id.is_none());
    }

    #[test]
    fn test_child_inherits_depth_and_parent() {
        let parent = Task::new("outer");
        let child = Task::child_of(&parent, "inner");
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
    }

    #[test]
    fn test_transition_happy_path() {
        let mut task = Task::new("x");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Done).unwrap();
        assert!(task.status.is_terminal());
    }

    #[test]
    fn test_terminal_is_sink() {
        let mut task = Task::new("x");
        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Stopped).unwrap();
        let err = task.transition(TaskStatus::Running).unwrap_err();
        assert_eq!(err.from, TaskStatus::Stopped);
        assert_eq!(task.status, TaskStatus::Stopped);
    }

    #[test]
    fn test_summary_counts_steps_and_screenshots() {
        let mut task = Task::new("x");
        let mut step = TaskStep::new(1, PlannedAction::new(ActionKind::Screenshot, json!({})));
        step.screenshot = Some("shots/x.png.b64".to_string());
        task.push_step(step);
        let summary = task.summary();
        assert_eq!(summary.steps, 1);
        assert!(summary.has_screenshots);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&TaskStatus::Stopped).unwrap(), "\"stopped\"");
        assert_eq!(
            serde_json::to_string(&StopReason::StepBudgetExhausted).unwrap(),
            "\"step_budget_exhausted\""
        );
    }

    proptest! {
        #[test]
        fn prop_only_lifecycle_edges_are_reachable(moves in proptest::collection::vec(0usize..5, 0..20)) {
            let mut task = Task::new("prop");
            let mut path = vec![task.status];
            for m in moves {
                let before = task.status;
                match task.transition(ALL[m]) {
                    Ok(()) => {
                        prop_assert!(before.can_transition_to(ALL[m]));
                        path.push(task.status);
                    }
                    Err(_) => prop_assert_eq!(task.status, before),
                }
            }
            // at most queued -> running -> terminal
            prop_assert!(path.len() <= 3);
            if path.len() > 1 {
                prop_assert_eq!(path[1], TaskStatus::Running);
            }
            if path.len() == 3 {
                prop_assert!(path[2].is_terminal());
            }
        }
    }
}
