//! Task steps, attempts and the retry vocabularies

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::action::{ActionResult, Params, PlannedAction};

/// Closed set of failure categories produced by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Timeout,
    Permission,
    Network,
    Resource,
    Syntax,
    MissingDependency,
    ServerError,
    ClientError,
    NonzeroExit,
    ErrorFlag,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Timeout => "timeout",
            ErrorType::Permission => "permission",
            ErrorType::Network => "network",
            ErrorType::Resource => "resource",
            ErrorType::Syntax => "syntax",
            ErrorType::MissingDependency => "missing_dependency",
            ErrorType::ServerError => "server_error",
            ErrorType::ClientError => "client_error",
            ErrorType::NonzeroExit => "nonzero_exit",
            ErrorType::ErrorFlag => "error_flag",
            ErrorType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Remediation hint attached to each retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    WaitLonger,
    EscalatePrivileges,
    RetryConnection,
    ReduceLoad,
    FixSyntax,
    InstallDependency,
    DebugApproach,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStrategy::WaitLonger => "wait_longer",
            RetryStrategy::EscalatePrivileges => "escalate_privileges",
            RetryStrategy::RetryConnection => "retry_connection",
            RetryStrategy::ReduceLoad => "reduce_load",
            RetryStrategy::FixSyntax => "fix_syntax",
            RetryStrategy::InstallDependency => "install_dependency",
            RetryStrategy::DebugApproach => "debug_approach",
        }
    }
}

impl std::fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution of a planned action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptInfo {
    /// 1-based
    pub attempt_number: u32,
    pub action: PlannedAction,
    pub result: ActionResult,

    /// Backoff slept before this attempt ran
    #[serde(default)]
    pub delay_ms: u64,
}

/// A retry recorded against a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptedFix {
    pub attempt_number: u32,
    pub strategy: RetryStrategy,
    pub action: PlannedAction,
}

/// Diagnostic state accumulated while retrying a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepContext {
    #[serde(default)]
    pub learned_issues: BTreeSet<ErrorType>,

    #[serde(default)]
    pub attempted_fixes: Vec<AttemptedFix>,

    /// Retries ended because consecutive attempts showed no progress
    #[serde(default)]
    pub stalled: bool,
}

/// One planner-proposed action and its execution record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    /// 1-based position within the task
    pub index: usize,
    pub planned: PlannedAction,

    #[serde(default)]
    pub attempts: Vec<AttemptInfo>,

    #[serde(default)]
    pub context: StepContext,

    /// Data of the most recent attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Params>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl TaskStep {
    pub fn new(index: usize, planned: PlannedAction) -> Self {
        debug!(index, action = %planned.action, "TaskStep::new: called");
        Self {
            index,
            planned,
            attempts: Vec::new(),
            context: StepContext::default(),
            result: None,
            screenshot: None,
        }
    }

    /// Append an attempt and refresh the denormalized result
    pub fn record_attempt(&mut self, attempt: AttemptInfo) {
        debug!(index = self.index, attempt = attempt.attempt_number, status = attempt.result.status, "TaskStep::record_attempt: called");
        self.result = Some(attempt.result.data.clone());
        self.attempts.push(attempt);
    }

    /// Result of the last attempt, if any
    pub fn last_result(&self) -> Option<&ActionResult> {
        self.attempts.last().map(|a| &a.result)
    }
}
