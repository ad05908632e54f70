//! Task execution loop
//!
//! Owns one task from `queued` to a terminal status: plan, record the step,
//! gate `done`, otherwise dispatch under the retry policy. Every change is
//! persisted and published before the loop moves on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::artifacts::{Artifact, extract_artifact};
use super::classify::{classify, retry_strategy_for};
use super::context::{PlanningContext, truncate_chars};
use super::gate::{REJECT_DONE_MESSAGE, can_complete};
use super::retry::{RetryDecision, RetryPolicy, decide, is_error_like};
use super::templates::TemplateCatalog;
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::domain::{
    ActionKind, ActionResult, AttemptInfo, AttemptedFix, Params, PlannedAction, Role, StopReason, Task, TaskStatus,
    TaskStep, TransitionError,
};
use crate::planner::{PlanError, Planner};
use crate::registry::TaskRegistry;
use crate::store::{StoreError, TaskStore};

/// Cap on the result JSON quoted in a history summary
const SUMMARY_RESULT_CHARS: usize = 500;

/// Failures that end a task in `error`
#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Budgets the loop runs under
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_steps: usize,
    pub max_recursion_depth: u32,
    pub max_context_chars: usize,
    pub retry: RetryPolicy,
    pub artifacts_dir: PathBuf,
}

impl EngineSettings {
    pub fn new(engine: &EngineConfig, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_steps: engine.max_steps,
            max_recursion_depth: engine.max_recursion_depth,
            max_context_chars: engine.max_context_chars,
            retry: engine.retry_policy(),
            artifacts_dir: artifacts_dir.into(),
        }
    }
}

enum Flow {
    Continue,
    Done,
    Cancelled,
}

enum StepOutcome {
    Finished(Option<Artifact>),
    Cancelled,
}

/// Drives tasks through the plan / dispatch / verify cycle
pub struct TaskEngine {
    planner: Arc<dyn Planner>,
    dispatcher: Arc<dyn Dispatcher>,
    store: Arc<TaskStore>,
    registry: TaskRegistry,
    templates: TemplateCatalog,
    settings: EngineSettings,
}

impl TaskEngine {
    pub fn new(
        planner: Arc<dyn Planner>,
        dispatcher: Arc<dyn Dispatcher>,
        store: Arc<TaskStore>,
        registry: TaskRegistry,
        settings: EngineSettings,
    ) -> Self {
        debug!(
            max_steps = settings.max_steps,
            max_retries = settings.retry.max_retries_per_step,
            base_backoff_ms = settings.retry.base_backoff_ms,
            "TaskEngine::new: called"
        );
        Self {
            planner,
            dispatcher,
            store,
            registry,
            templates: TemplateCatalog::new(),
            settings,
        }
    }

    /// Run `task` to a terminal status and return the final state
    ///
    /// The task must already be persisted. A `true` on `stop` ends it in
    /// `stopped` with reason `cancelled`.
    pub async fn run(&self, mut task: Task, mut stop: watch::Receiver<bool>) -> Task {
        debug!(task_id = %task.id, depth = task.depth, max_steps = self.settings.max_steps, "TaskEngine::run: called");
        if task.status.is_terminal() {
            debug!(task_id = %task.id, status = %task.status, "TaskEngine::run: already terminal");
            return task;
        }
        info!(task_id = %task.id, goal = %task.goal, depth = task.depth, "Starting task");

        if task.status == TaskStatus::Queued
            && let Err(e) = self.set_status(&mut task, TaskStatus::Running).await
        {
            self.fail(&mut task, e.to_string()).await;
            return task;
        }

        for i in 0..self.settings.max_steps {
            if *stop.borrow() {
                self.halt(&mut task, StopReason::Cancelled).await;
                return task;
            }

            let step_no = i + 1;
            info!(task_id = %task.id, step = step_no, max_steps = self.settings.max_steps, "Task step");
            match self.iterate(&mut task, step_no, &mut stop).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Done) => {
                    info!(task_id = %task.id, steps = task.steps.len(), "Task done");
                    return task;
                }
                Ok(Flow::Cancelled) => {
                    self.halt(&mut task, StopReason::Cancelled).await;
                    return task;
                }
                Err(e) => {
                    self.fail(&mut task, e.to_string()).await;
                    return task;
                }
            }
        }

        self.halt(&mut task, StopReason::StepBudgetExhausted).await;
        task
    }

    /// Boxed `run` for sub-tasks nested inside a step
    pub fn run_boxed(&self, task: Task, stop: watch::Receiver<bool>) -> BoxFuture<'_, Task> {
        Box::pin(self.run(task, stop))
    }

    async fn iterate(&self, task: &mut Task, step_no: usize, stop: &mut watch::Receiver<bool>) -> Result<Flow, LoopError> {
        debug!(task_id = %task.id, step = step_no, "TaskEngine::iterate: called");
        let context =
            PlanningContext::new(task, step_no, self.settings.max_steps, self.settings.max_context_chars).render();

        let planned = tokio::select! {
            biased;
            _ = cancelled(stop) => return Ok(Flow::Cancelled),
            planned = self.planner.plan(&context) => planned?,
        };
        info!(task_id = %task.id, step = step_no, action = %planned.action, "Planned action");

        let index = task.push_step(TaskStep::new(step_no, planned.clone()));
        self.save_steps(task).await?;
        let planned_json = serde_json::to_string(&planned).unwrap_or_else(|_| planned.action.to_string());
        self.say(task, Role::Planner, planned_json).await?;

        if planned.action == ActionKind::Done {
            if can_complete(task) {
                let summary = planned.param_str("result").unwrap_or_default().to_string();
                self.say(task, Role::Assistant, format!("DONE: {}", summary)).await?;
                self.set_status(task, TaskStatus::Done).await?;
                return Ok(Flow::Done);
            }
            warn!(task_id = %task.id, step = step_no, "Rejected done without a passing verification");
            self.say(task, Role::System, REJECT_DONE_MESSAGE.to_string()).await?;
            return Ok(Flow::Continue);
        }

        match self.run_step(task, index, &planned, stop).await? {
            StepOutcome::Cancelled => Ok(Flow::Cancelled),
            StepOutcome::Finished(artifact) => {
                let summary = summarize_step(&task.steps[index], artifact.as_ref());
                self.say(task, Role::System, summary).await?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Attempt the action until it succeeds, stalls or runs out of attempts
    async fn run_step(
        &self,
        task: &mut Task,
        index: usize,
        planned: &PlannedAction,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<StepOutcome, LoopError> {
        let policy = self.settings.retry;
        let step_no = task.steps[index].index;
        debug!(task_id = %task.id, step = step_no, max_attempts = policy.max_attempts(), "TaskEngine::run_step: called");

        let mut prev: Option<ActionResult> = None;
        let mut artifact = None;

        for attempt_number in 1..=policy.max_attempts() {
            let delay_ms = policy.delay_ms_before(attempt_number);
            if delay_ms > 0 {
                info!(task_id = %task.id, step = step_no, attempt = attempt_number, backoff_ms = delay_ms, "Backing off before retry");
                tokio::select! {
                    biased;
                    _ = cancelled(stop) => return Ok(StepOutcome::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
            }
            if *stop.borrow() {
                return Ok(StepOutcome::Cancelled);
            }

            let mut result = match planned.action {
                ActionKind::SpawnSubtask | ActionKind::SpawnTemplate => {
                    self.spawn_child(task, planned, stop.clone()).await
                }
                _ => tokio::select! {
                    biased;
                    _ = cancelled(stop) => return Ok(StepOutcome::Cancelled),
                    result = self.dispatcher.dispatch(planned.action, &planned.params) => result,
                },
            };

            if let Some(found) = extract_artifact(
                &self.settings.artifacts_dir,
                &task.id,
                step_no,
                attempt_number,
                &mut result,
            )
            .await
            {
                task.steps[index].screenshot = Some(found.reference.clone());
                artifact = Some(found);
            }

            let decision = decide(&policy, attempt_number, prev.as_ref(), &result);
            let error_type = is_error_like(&result).then(|| classify(&result));
            debug!(task_id = %task.id, step = step_no, attempt = attempt_number, status = result.status, ?error_type, ?decision, "TaskEngine::run_step: attempt finished");

            let step = &mut task.steps[index];
            if let Some(error_type) = error_type {
                step.context.learned_issues.insert(error_type);
            }
            step.record_attempt(AttemptInfo {
                attempt_number,
                action: planned.clone(),
                result: result.clone(),
                delay_ms,
            });
            match decision {
                RetryDecision::Stalled => {
                    warn!(task_id = %task.id, step = step_no, attempt = attempt_number, "No progress between attempts, giving up on step");
                    step.context.stalled = true;
                }
                RetryDecision::Exhausted => {
                    warn!(task_id = %task.id, step = step_no, attempts = attempt_number, "Attempt budget exhausted");
                }
                RetryDecision::Retry => {
                    if let Some(error_type) = error_type {
                        step.context.attempted_fixes.push(AttemptedFix {
                            attempt_number: attempt_number + 1,
                            strategy: retry_strategy_for(error_type),
                            action: planned.clone(),
                        });
                    }
                }
                RetryDecision::Succeeded => {}
            }
            task.touch();
            self.save_steps(task).await?;

            if decision.is_final() {
                return Ok(StepOutcome::Finished(artifact));
            }
            prev = Some(result);
        }

        Ok(StepOutcome::Finished(artifact))
    }

    /// Run a nested task to completion inside the current step
    async fn spawn_child(&self, parent: &Task, planned: &PlannedAction, stop: watch::Receiver<bool>) -> ActionResult {
        debug!(task_id = %parent.id, action = %planned.action, "TaskEngine::spawn_child: called");
        if parent.depth + 1 > self.settings.max_recursion_depth {
            warn!(task_id = %parent.id, depth = parent.depth, "Sub-task refused, recursion depth exceeded");
            return ActionResult::new(400, json!({"ok": false, "error": "max_recursion_depth_exceeded"}));
        }

        let goal = match planned.action {
            ActionKind::SpawnTemplate => {
                let template = planned.param_str("template").unwrap_or_default();
                let inputs: Params = match planned.params.get("inputs") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Params::new(),
                };
                self.templates.resolve_goal(template, &inputs)
            }
            _ => planned.param_str("goal").unwrap_or_default().trim().to_string(),
        };
        if goal.is_empty() {
            return ActionResult::new(400, json!({"ok": false, "error": "missing_goal"}));
        }

        let child = Task::child_of(parent, goal);
        if let Err(e) = self.store.create(&child).await {
            error!(task_id = %parent.id, child_id = %child.id, error = %e, "Failed to persist sub-task");
            return ActionResult::new(500, json!({"ok": false, "error": format!("subtask persist failed: {}", e)}));
        }
        self.registry.publish(&child);
        info!(task_id = %parent.id, child_id = %child.id, goal = %child.goal, "Running sub-task");

        let child = self.run_boxed(child, stop).await;
        let mut data = Params::new();
        data.insert("ok".into(), json!(child.status == TaskStatus::Done));
        data.insert("taskId".into(), json!(child.id));
        data.insert("status".into(), json!(child.status.as_str()));
        if let Some(error) = &child.error {
            data.insert("error".into(), json!(error));
        }
        ActionResult::new(200, Value::Object(data))
    }

    async fn say(&self, task: &mut Task, role: Role, content: String) -> Result<(), StoreError> {
        self.store.append_message(&task.id, role, &content).await?;
        task.push_history(role, content);
        self.registry.publish(task);
        Ok(())
    }

    async fn save_steps(&self, task: &Task) -> Result<(), StoreError> {
        self.store.write_steps(&task.id, &task.steps).await?;
        self.registry.publish(task);
        Ok(())
    }

    async fn set_status(&self, task: &mut Task, next: TaskStatus) -> Result<(), LoopError> {
        task.transition(next)?;
        self.store.record_status(task).await?;
        self.registry.publish(task);
        Ok(())
    }

    async fn halt(&self, task: &mut Task, reason: StopReason) {
        info!(task_id = %task.id, %reason, steps = task.steps.len(), "Task stopped");
        task.stop_reason = Some(reason);
        if let Err(e) = self.set_status(task, TaskStatus::Stopped).await {
            error!(task_id = %task.id, error = %e, "Failed to record stopped status");
            self.registry.publish(task);
        }
    }

    async fn fail(&self, task: &mut Task, message: String) {
        error!(task_id = %task.id, error = %message, "Task failed");
        task.error = Some(message.clone());
        if let Err(e) = self.say(task, Role::System, format!("ERROR: {}", message)).await {
            error!(task_id = %task.id, error = %e, "Failed to record error message");
        }
        if let Err(e) = self.set_status(task, TaskStatus::Error).await {
            error!(task_id = %task.id, error = %e, "Failed to record error status");
            self.registry.publish(task);
        }
    }
}

/// Resolves once the stop flag is true; never if the sender is gone
async fn cancelled(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Condensed history line for a finished step
fn summarize_step(step: &TaskStep, artifact: Option<&Artifact>) -> String {
    let attempts = step.attempts.len();
    let status = step.last_result().map(|r| r.status).unwrap_or_default();
    let result = step
        .result
        .as_ref()
        .map(|data| serde_json::to_string(data).unwrap_or_default())
        .unwrap_or_default();

    let mut line = format!(
        "RESULT step {} {}: status {} after {} attempt{}",
        step.index,
        step.planned.action,
        status,
        attempts,
        if attempts == 1 { "" } else { "s" }
    );
    if step.context.stalled {
        line.push_str(" (stalled)");
    }
    if !step.context.learned_issues.is_empty() {
        let issues: Vec<&str> = step.context.learned_issues.iter().map(|e| e.as_str()).collect();
        line.push_str(&format!(" [issues: {}]", issues.join(", ")));
    }
    if let Some(artifact) = artifact {
        line.push_str(&format!(" screenshot {} ({} bytes)", artifact.reference, artifact.bytes));
    }
    line.push_str(": ");
    line.push_str(&truncate_chars(&result, SUMMARY_RESULT_CHARS));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorType;

    #[test]
    fn test_summary_mentions_artifact_not_payload() {
        let mut step = TaskStep::new(2, PlannedAction::new(ActionKind::Screenshot, json!({})));
        step.record_attempt(AttemptInfo {
            attempt_number: 1,
            action: step.planned.clone(),
            result: ActionResult::ok(json!({"image": {"artifact": "t-step2-a1.png.b64", "bytes": 4000}})),
            delay_ms: 0,
        });
        let artifact = Artifact {
            reference: "t-step2-a1.png.b64".to_string(),
            bytes: 4000,
        };
        let line = summarize_step(&step, Some(&artifact));
        assert!(line.starts_with("RESULT step 2 screenshot: status 200 after 1 attempt"));
        assert!(line.contains("screenshot t-step2-a1.png.b64 (4000 bytes)"));
    }

    #[test]
    fn test_summary_marks_stall_and_issues() {
        let mut step = TaskStep::new(1, PlannedAction::new(ActionKind::RunShell, json!({"script": "x"})));
        for n in 1..=2 {
            step.record_attempt(AttemptInfo {
                attempt_number: n,
                action: step.planned.clone(),
                result: ActionResult::ok(json!({"exitCode": 1, "stderr": "permission denied"})),
                delay_ms: 0,
            });
        }
        step.context.stalled = true;
        step.context.learned_issues.insert(ErrorType::Permission);
        let line = summarize_step(&step, None);
        assert!(line.contains("after 2 attempts (stalled) [issues: permission]"));
        assert!(line.contains("permission denied"));
    }

    #[test]
    fn test_summary_truncates_large_results() {
        let mut step = TaskStep::new(1, PlannedAction::new(ActionKind::RunShell, json!({})));
        step.record_attempt(AttemptInfo {
            attempt_number: 1,
            action: step.planned.clone(),
            result: ActionResult::ok(json!({"stdout": "y".repeat(5000)})),
            delay_ms: 0,
        });
        let line = summarize_step(&step, None);
        assert!(line.len() < 700);
        assert!(line.ends_with("..."));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_flag_set() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { cancelled(&mut rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_pending_after_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), cancelled(&mut rx)).await;
        assert!(outcome.is_err());
    }
}
