//! Verification gate: no `done` without a passing `verify_result`

use serde_json::Value;
use tracing::debug;

use crate::domain::{ActionKind, Task, TaskStep};

/// System message appended when a `done` proposal is refused
pub const REJECT_DONE_MESSAGE: &str =
    "ERROR: REJECT_DONE: Cannot mark done without at least one successful verify_result. Add verification steps.";

/// True iff some `verify_result` step's last attempt reported `ok == true`
pub fn can_complete(task: &Task) -> bool {
    let passed = task.steps.iter().any(is_passing_verification);
    debug!(task_id = %task.id, steps = task.steps.len(), passed, "can_complete: called");
    passed
}

fn is_passing_verification(step: &TaskStep) -> bool {
    step.planned.action == ActionKind::VerifyResult
        && step
            .last_result()
            .is_some_and(|r| r.data.get("ok") == Some(&Value::Bool(true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionResult, AttemptInfo, PlannedAction};
    use proptest::prelude::*;
    use serde_json::json;

    fn step_with(index: usize, action: ActionKind, outcomes: &[Value]) -> TaskStep {
        let planned = PlannedAction::new(action, json!({}));
        let mut step = TaskStep::new(index, planned.clone());
        for (i, data) in outcomes.iter().enumerate() {
            step.record_attempt(AttemptInfo {
                attempt_number: i as u32 + 1,
                action: planned.clone(),
                result: ActionResult::ok(data.clone()),
                delay_ms: 0,
            });
        }
        step
    }

    #[test]
    fn test_empty_task_cannot_complete() {
        assert!(!can_complete(&Task::new("x")));
    }

    #[test]
    fn test_passing_verification_opens_gate() {
        let mut task = Task::new("x");
        task.push_step(step_with(1, ActionKind::VerifyResult, &[json!({"ok": true, "method": "file_exists"})]));
        assert!(can_complete(&task));
    }

    #[test]
    fn test_shell_success_is_not_verification() {
        let mut task = Task::new("x");
        task.push_step(step_with(1, ActionKind::RunShell, &[json!({"ok": true, "exitCode": 0})]));
        assert!(!can_complete(&task));
    }

    #[test]
    fn test_only_last_attempt_counts() {
        let mut task = Task::new("x");
        task.push_step(step_with(1, ActionKind::VerifyResult, &[json!({"ok": true}), json!({"ok": false})]));
        assert!(!can_complete(&task));
    }

    #[test]
    fn test_truthy_but_not_true_is_rejected() {
        let mut task = Task::new("x");
        task.push_step(step_with(1, ActionKind::VerifyResult, &[json!({"ok": "yes"})]));
        assert!(!can_complete(&task));
    }

    fn arb_step() -> impl Strategy<Value = (ActionKind, Vec<Option<bool>>)> {
        (
            prop::sample::select(ActionKind::ALL.to_vec()),
            prop::collection::vec(prop::option::of(any::<bool>()), 0..4),
        )
    }

    proptest! {
        #[test]
        fn prop_gate_matches_predicate(steps in prop::collection::vec(arb_step(), 0..8)) {
            let mut task = Task::new("prop");
            let mut expected = false;
            for (i, (kind, oks)) in steps.iter().enumerate() {
                let outcomes: Vec<Value> = oks
                    .iter()
                    .map(|ok| match ok {
                        Some(b) => json!({"ok": b}),
                        None => json!({}),
                    })
                    .collect();
                if *kind == ActionKind::VerifyResult && oks.last() == Some(&Some(true)) {
                    expected = true;
                }
                task.push_step(step_with(i + 1, *kind, &outcomes));
            }
            prop_assert_eq!(can_complete(&task), expected);
        }
    }
}
