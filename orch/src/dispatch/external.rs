//! run_external_job - hand a job description to an external program

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::shell::run_process;
use crate::domain::{ActionResult, Params};

/// Runs `<program> <configured args> <params.args>` with the params as JSON on stdin
#[derive(Debug, Clone)]
pub struct ExternalJobRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl ExternalJobRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration, working_dir: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            working_dir,
        }
    }

    pub async fn run(&self, params: &Params) -> ActionResult {
        let extra: Vec<String> = match params.get("args") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };
        debug!(program = %self.program, args = ?self.args, ?extra, "ExternalJobRunner::run: called");

        let mut command = Command::new(&self.program);
        command.args(&self.args).args(&extra);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let stdin = serde_json::to_vec(params).unwrap_or_default();
        match run_process(command, Some(stdin), self.timeout).await {
            Ok(output) => output.into_result(),
            Err(failure) => failure.into_result(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Params {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_params_are_piped_as_json() {
        let runner = ExternalJobRunner::new("sh", vec!["-c".to_string(), "cat".to_string()], Duration::from_secs(5), None);
        let result = runner.run(&params(json!({"prompt": "build it"}))).await;
        assert_eq!(result.status, 200);
        assert_eq!(result.ok_flag(), Some(true));
        let stdout = result.field("stdout").and_then(Value::as_str).unwrap();
        let echoed: Value = serde_json::from_str(stdout).unwrap();
        assert_eq!(echoed["prompt"], "build it");
    }

    #[tokio::test]
    async fn test_params_args_are_appended() {
        let runner = ExternalJobRunner::new(
            "sh",
            vec!["-c".to_string(), "echo \"$0 $1\"".to_string()],
            Duration::from_secs(5),
            None,
        );
        let result = runner.run(&params(json!({"args": ["first", 2]}))).await;
        assert!(result.text("stdout").contains("first 2"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = ExternalJobRunner::new("/nonexistent/job-runner", vec![], Duration::from_secs(5), None);
        let result = runner.run(&Params::new()).await;
        assert_eq!(result.status, 500);
    }
}
