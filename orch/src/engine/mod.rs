//! Task execution engine
//!
//! - [`classify`] - maps a failed result to an [`ErrorType`](crate::domain::ErrorType)
//! - [`RetryPolicy`] / [`decide`] - attempt budget, backoff and stall detection
//! - [`can_complete`] - the verification gate in front of `done`
//! - [`PlanningContext`] - budgeted planner input
//! - [`TemplateCatalog`] - goals for `spawn_template`
//! - [`TaskEngine`] - the loop tying it all together

mod artifacts;
mod classify;
mod context;
mod gate;
mod retry;
mod runner;
mod templates;

pub use artifacts::{Artifact, MIN_ARTIFACT_CHARS, extract_artifact};
pub use classify::{classify, retry_strategy_for};
pub use context::{PlanningContext, truncate_chars};
pub use gate::{REJECT_DONE_MESSAGE, can_complete};
pub use retry::{RetryDecision, RetryPolicy, decide, is_error_like, made_progress};
pub use runner::{EngineSettings, LoopError, TaskEngine};
pub use templates::TemplateCatalog;
