//! Action dispatch
//!
//! Executes a planned action and reports the outcome as an [`ActionResult`].
//! Dispatch never fails by type: bad parameters, timeouts, spawn failures
//! and unreachable drivers all come back as status-coded results.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

mod desktop;
mod external;
mod shell;
mod verify;

pub use desktop::DesktopDriver;
pub use external::ExternalJobRunner;
pub use shell::{ProcessFailure, ProcessOutput, ShellRunner, run_process, tail_chars};
pub use verify::Verifier;

use crate::config::DispatchConfig;
use crate::domain::{ActionKind, ActionResult, Params};

/// Executor for planned actions
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, action: ActionKind, params: &Params) -> ActionResult;
}

/// Routes each action kind to its executor
pub struct ActionRouter {
    shell: ShellRunner,
    verifier: Verifier,
    desktop: DesktopDriver,
    external: ExternalJobRunner,
}

impl ActionRouter {
    pub fn new(config: &DispatchConfig) -> Result<Self, reqwest::Error> {
        debug!(driver = %config.desktop_driver_url, shell = %config.shell, "ActionRouter::new: called");
        let shell = ShellRunner::new(
            config.shell.clone(),
            Duration::from_millis(config.shell_timeout_ms),
            config.working_dir.clone(),
        );
        let driver_timeout = Duration::from_millis(config.driver_timeout_ms);
        let verifier = Verifier::new(shell.clone(), verify::probe_client(driver_timeout)?);
        let desktop = DesktopDriver::new(config.desktop_driver_url.clone(), driver_timeout)?;
        let external = ExternalJobRunner::new(
            config.external_job.program.clone(),
            config.external_job.args.clone(),
            Duration::from_millis(config.external_job.timeout_ms),
            config.working_dir.clone(),
        );
        Ok(Self {
            shell,
            verifier,
            desktop,
            external,
        })
    }
}

#[async_trait]
impl Dispatcher for ActionRouter {
    async fn dispatch(&self, action: ActionKind, params: &Params) -> ActionResult {
        debug!(%action, "ActionRouter::dispatch: called");
        match action {
            ActionKind::RunShell => self.shell.run_action(params).await,
            ActionKind::VerifyResult => self.verifier.verify(params).await,
            ActionKind::RunExternalJob => self.external.run(params).await,
            ActionKind::Screenshot
            | ActionKind::MoveMouse
            | ActionKind::ClickMouse
            | ActionKind::Scroll
            | ActionKind::TypeText
            | ActionKind::KeyPress
            | ActionKind::OpenApp => self.desktop.send(action, params).await,
            ActionKind::SpawnSubtask | ActionKind::SpawnTemplate | ActionKind::Done => {
                debug!(%action, "ActionRouter::dispatch: handled by the engine");
                ActionResult::new(400, json!({"error": "not_dispatchable", "action": action.as_str()}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ActionRouter {
        let mut config = DispatchConfig::default();
        config.desktop_driver_url = "http://127.0.0.1:9/computer-use".to_string();
        config.driver_timeout_ms = 2000;
        ActionRouter::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_routes_run_shell() {
        let mut params = Params::new();
        params.insert("script".into(), json!("echo routed"));
        let result = router().dispatch(ActionKind::RunShell, &params).await;
        assert_eq!(result.status, 200);
        assert!(result.text("stdout").contains("routed"));
    }

    #[tokio::test]
    async fn test_routes_verify_result() {
        let mut params = Params::new();
        params.insert("check_method".into(), json!("command"));
        params.insert("command".into(), json!("true"));
        let result = router().dispatch(ActionKind::VerifyResult, &params).await;
        assert_eq!(result.ok_flag(), Some(true));
    }

    #[tokio::test]
    async fn test_engine_actions_are_not_dispatchable() {
        for action in [ActionKind::SpawnSubtask, ActionKind::SpawnTemplate, ActionKind::Done] {
            let result = router().dispatch(action, &Params::new()).await;
            assert_eq!(result.status, 400);
            assert_eq!(result.text("error"), "not_dispatchable");
        }
    }
}
