//! Planner collaborator
//!
//! Asks the LLM for the next atomic action given a rendered planning context.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

mod parse;

pub use parse::parse_planned_action;

use crate::domain::{ActionKind, PlannedAction};
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message};

/// Planner failures; every variant is fatal to the task
///
/// Apart from `Llm`, each variant is a flavour of an unparseable reply: an
/// empty reply carries no action to parse.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("planner returned an empty reply")]
    EmptyReply,

    #[error("planner returned unparseable action: {0}")]
    Unparseable(String),

    #[error("planner reply has no action field")]
    MissingAction,

    #[error("planner proposed unknown action '{0}'")]
    UnknownAction(String),
}

/// Source of the next action for a task
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, context: &str) -> Result<PlannedAction, PlanError>;
}

/// Planner backed by a chat-completion model
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
    system_prompt: String,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, max_tokens: u32) -> Self {
        Self {
            llm,
            max_tokens,
            system_prompt: system_prompt(),
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, context: &str) -> Result<PlannedAction, PlanError> {
        debug!(context_len = context.len(), "LlmPlanner::plan: called");
        let request = CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            messages: vec![Message::user(format!("{}\nReturn ONLY JSON.", context))],
            max_tokens: self.max_tokens,
            temperature: None,
        };

        let response = self.llm.complete(request).await?;
        let text = response.content.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(PlanError::EmptyReply);
        }

        let action = parse_planned_action(&text)?;
        info!(action = %action.action, thought = %action.thought, "Planner proposed action");
        Ok(action)
    }
}

/// System prompt listing the action vocabulary and the completion rules
pub fn system_prompt() -> String {
    let names: Vec<&str> = ActionKind::ALL.iter().map(|a| a.as_str()).collect();
    [
        "You are a meticulous automation planner.".to_string(),
        "Plan exactly one atomic action at a time.".to_string(),
        format!("Available actions: {}.", names.join(", ")),
        "Output ONLY strict JSON matching this schema:".to_string(),
        format!(r#"{{"thought":"brief reasoning","action":"{}","params":{{}}}}"#, names.join("|")),
        "run_shell: params.script is run with the system shell; optional params.cwd.".to_string(),
        "run_external_job: params are passed to the external job runner as JSON; optional params.args.".to_string(),
        "verify_result: params.check_method is one of file_exists (path), command or test (command, optional \
         expectation), build (project_dir, optional build_command) or api_call (url, optional expected_status); \
         it returns an ok boolean."
            .to_string(),
        "spawn_subtask: params.goal runs a nested task. spawn_template: params.template and params.inputs.".to_string(),
        "You MUST obtain at least one successful verify_result before proposing done; done without it is rejected."
            .to_string(),
        "When the action is done, put a final summary in params.result.".to_string(),
        "The user message starts with a Context: section holding the goal, the step counter, learned issues and \
         recent history; use it faithfully."
            .to_string(),
    ]
    .join(" ")
}
