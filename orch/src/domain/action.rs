//! Planned actions and action results

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form action parameters / result payload
pub type Params = serde_json::Map<String, Value>;

/// The closed set of actions a planner may propose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Screenshot,
    MoveMouse,
    ClickMouse,
    Scroll,
    TypeText,
    KeyPress,
    OpenApp,
    #[serde(alias = "run_powershell")]
    RunShell,
    #[serde(alias = "autodev_run")]
    RunExternalJob,
    VerifyResult,
    SpawnSubtask,
    SpawnTemplate,
    Done,
}

impl ActionKind {
    /// Every action kind, in the order the planner prompt lists them
    pub const ALL: [ActionKind; 13] = [
        ActionKind::Screenshot,
        ActionKind::MoveMouse,
        ActionKind::ClickMouse,
        ActionKind::Scroll,
        ActionKind::TypeText,
        ActionKind::KeyPress,
        ActionKind::OpenApp,
        ActionKind::RunShell,
        ActionKind::RunExternalJob,
        ActionKind::VerifyResult,
        ActionKind::SpawnSubtask,
        ActionKind::SpawnTemplate,
        ActionKind::Done,
    ];

    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Screenshot => "screenshot",
            ActionKind::MoveMouse => "move_mouse",
            ActionKind::ClickMouse => "click_mouse",
            ActionKind::Scroll => "scroll",
            ActionKind::TypeText => "type_text",
            ActionKind::KeyPress => "key_press",
            ActionKind::OpenApp => "open_app",
            ActionKind::RunShell => "run_shell",
            ActionKind::RunExternalJob => "run_external_job",
            ActionKind::VerifyResult => "verify_result",
            ActionKind::SpawnSubtask => "spawn_subtask",
            ActionKind::SpawnTemplate => "spawn_template",
            ActionKind::Done => "done",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One atomic action proposed by the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Planner rationale (never executed)
    #[serde(default)]
    pub thought: String,

    pub action: ActionKind,

    #[serde(default)]
    pub params: Params,
}

impl PlannedAction {
    pub fn new(action: ActionKind, params: Value) -> Self {
        Self {
            thought: String::new(),
            action,
            params: into_map(params),
        }
    }

    /// String parameter, trimmed; empty strings count as absent
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Outcome of dispatching an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// HTTP-style status code (200 ok, 4xx caller error, 5xx executor error)
    pub status: u16,

    #[serde(default)]
    pub data: Params,
}

impl ActionResult {
    pub fn new(status: u16, data: Value) -> Self {
        Self {
            status,
            data: into_map(data),
        }
    }

    pub fn ok(data: Value) -> Self {
        Self::new(200, data)
    }

    /// Raw field lookup
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Numeric `exitCode`, if the result carries one
    pub fn exit_code(&self) -> Option<i64> {
        let value = self.data.get("exitCode")?;
        value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
    }

    /// `data.ok` as a strict boolean
    pub fn ok_flag(&self) -> Option<bool> {
        self.data.get("ok").and_then(Value::as_bool)
    }

    /// Whether `data[key]` is present and truthy
    pub fn has_truthy(&self, key: &str) -> bool {
        self.data.get(key).is_some_and(truthy)
    }

    /// Lower-cased text of a field; non-string truthy values are stringified
    pub fn text(&self, key: &str) -> String {
        match self.data.get(key) {
            Some(Value::String(s)) => s.to_lowercase(),
            Some(v) if truthy(v) => v.to_string().to_lowercase(),
            _ => String::new(),
        }
    }
}

/// Loose truthiness: null, false, 0 and "" are falsy, everything else truthy
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn into_map(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        Value::Null => Params::new(),
        other => {
            let mut map = Params::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_kind_wire_names_round_trip() {
        for kind in ActionKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: ActionKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_legacy_action_aliases() {
        let kind: ActionKind = serde_json::from_str("\"run_powershell\"").unwrap();
        assert_eq!(kind, ActionKind::RunShell);
        let kind: ActionKind = serde_json::from_str("\"autodev_run\"").unwrap();
        assert_eq!(kind, ActionKind::RunExternalJob);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(serde_json::from_str::<ActionKind>("\"launch_rockets\"").is_err());
    }

    #[test]
    fn test_planned_action_defaults() {
        let action: PlannedAction = serde_json::from_value(json!({"action": "screenshot"})).unwrap();
        assert_eq!(action.thought, "");
        assert!(action.params.is_empty());
    }

    #[test]
    fn test_param_str_ignores_blank() {
        let action = PlannedAction::new(ActionKind::RunShell, json!({"script": "   ", "cwd": " /tmp "}));
        assert_eq!(action.param_str("script"), None);
        assert_eq!(action.param_str("cwd"), Some("/tmp"));
    }

    #[test]
    fn test_result_accessors() {
        let result = ActionResult::ok(json!({"exitCode": 2, "ok": false, "error": "Boom", "stdout": ""}));
        assert_eq!(result.exit_code(), Some(2));
        assert_eq!(result.ok_flag(), Some(false));
        assert!(result.has_truthy("error"));
        assert!(!result.has_truthy("stdout"));
        assert_eq!(result.text("error"), "boom");
        assert_eq!(result.text("missing"), "");
    }

    #[test]
    fn test_non_object_data_is_wrapped() {
        let result = ActionResult::new(200, json!("plain"));
        assert_eq!(result.field("value"), Some(&json!("plain")));
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!({})));
        assert!(truthy(&json!(-1)));
    }
}
