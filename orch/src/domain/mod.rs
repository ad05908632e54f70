//! Domain types for the orchestrator
//!
//! - [`Task`] - one automation goal under execution, with its history and steps
//! - [`TaskStep`] - one planner-proposed action and every attempt made at it
//! - [`PlannedAction`] / [`ActionResult`] - what the planner asked for and what came back
//! - [`ErrorType`] / [`RetryStrategy`] - the closed vocabularies used by retry handling

mod action;
mod id;
mod step;
mod task;

pub use action::{ActionKind, ActionResult, Params, PlannedAction, truthy};
pub use id::{new_task_id, now_ms};
pub use step::{AttemptInfo, AttemptedFix, ErrorType, RetryStrategy, StepContext, TaskStep};
pub use task::{HistoryEntry, Role, StopReason, Task, TaskStatus, TaskSummary, TransitionError};
