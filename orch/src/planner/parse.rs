//! Best-effort extraction of a planned action from a model reply

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::PlanError;
use crate::domain::{ActionKind, Params, PlannedAction};

static FENCE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n\s*```").ok());

/// Parse a planner reply into a [`PlannedAction`]
///
/// Tries, in order: the body of a fenced code block (or the whole reply),
/// then the slice between the first `{` and the last `}`. The object must
/// name a known action.
pub fn parse_planned_action(reply: &str) -> Result<PlannedAction, PlanError> {
    debug!(reply_len = reply.len(), "parse_planned_action: called");
    let candidate = FENCE_RE
        .as_ref()
        .and_then(|re| re.captures(reply))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
        .trim();

    let value = match serde_json::from_str::<Value>(candidate) {
        Ok(v) => v,
        Err(_) => {
            debug!("parse_planned_action: direct parse failed, trying brace slice");
            brace_slice(candidate)
                .and_then(|s| serde_json::from_str::<Value>(s).ok())
                .ok_or_else(|| PlanError::Unparseable(snippet(reply)))?
        }
    };

    into_action(value)
}

fn brace_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn into_action(value: Value) -> Result<PlannedAction, PlanError> {
    let Value::Object(mut map) = value else {
        return Err(PlanError::MissingAction);
    };

    let name = match map.remove("action") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return Err(PlanError::MissingAction),
    };
    let action: ActionKind =
        serde_json::from_value(Value::String(name.clone())).map_err(|_| PlanError::UnknownAction(name))?;

    let thought = match map.remove("thought") {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    let params = match map.remove("params") {
        Some(Value::Object(p)) => p,
        _ => Params::new(),
    };

    debug!(%action, "parse_planned_action: parsed");
    Ok(PlannedAction {
        thought,
        action,
        params,
    })
}

fn snippet(reply: &str) -> String {
    let s: String = reply.chars().take(120).collect();
    if s.len() < reply.len() { format!("{}...", s) } else { s }
}
