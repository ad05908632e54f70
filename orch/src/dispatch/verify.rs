//! verify_result - verification probes
//!
//! Every probe answers with `{ok, method, ...diagnostics}`. The `ok` flag is
//! what the completion gate looks at.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::shell::{ShellRunner, tail_chars};
use crate::domain::{ActionResult, Params};

const STDOUT_TAIL: usize = 800;
const STDERR_TAIL: usize = 400;
const DEFAULT_BUILD_COMMAND: &str = "cargo build";

/// Dispatches `verify_result` by `params.check_method`
pub struct Verifier {
    shell: ShellRunner,
    http: Client,
}

impl Verifier {
    pub fn new(shell: ShellRunner, http: Client) -> Self {
        Self { shell, http }
    }

    pub async fn verify(&self, params: &Params) -> ActionResult {
        let method = str_param(params, "check_method").unwrap_or_default().to_lowercase();
        debug!(%method, "Verifier::verify: called");
        match method.as_str() {
            "file_exists" => self.file_exists(params).await,
            "command" | "test" => self.command(&method, params).await,
            "build" => self.build(params).await,
            "api_call" => self.api_call(params).await,
            _ => {
                debug!(%method, "Verifier::verify: unsupported method");
                ActionResult::new(
                    400,
                    json!({"ok": false, "error": "unsupported_check_method", "method": method}),
                )
            }
        }
    }

    async fn file_exists(&self, params: &Params) -> ActionResult {
        let Some(path) = str_param(params, "path") else {
            return missing("file_exists", "missing_path");
        };
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
        debug!(%path, exists, "Verifier::file_exists: checked");
        ActionResult::ok(json!({"ok": exists, "method": "file_exists", "path": path}))
    }

    async fn command(&self, method: &str, params: &Params) -> ActionResult {
        let Some(command) = str_param(params, "command") else {
            return missing(method, "missing_command");
        };
        let cwd = str_param(params, "cwd").map(Path::new);
        let expectation = str_param(params, "expectation");

        match self.shell.run(command, cwd).await {
            Ok(output) => {
                let contains_ok = expectation.is_none_or(|e| output.stdout.contains(e));
                let ok = output.exit_code == 0 && contains_ok;
                let mut data = json!({
                    "ok": ok,
                    "method": method,
                    "command": command,
                    "exitCode": output.exit_code,
                    "containsOk": contains_ok,
                    "stdout": tail_chars(&output.stdout, STDOUT_TAIL),
                    "stderr": tail_chars(&output.stderr, STDERR_TAIL),
                });
                if let Some(e) = expectation {
                    data["expectation"] = json!(e);
                }
                ActionResult::ok(data)
            }
            Err(failure) => with_method(failure.into_result(), method),
        }
    }

    async fn build(&self, params: &Params) -> ActionResult {
        let Some(project_dir) = str_param(params, "project_dir") else {
            return missing("build", "missing_project_dir");
        };
        let build_command = str_param(params, "build_command").unwrap_or(DEFAULT_BUILD_COMMAND);

        match self.shell.run(build_command, Some(Path::new(project_dir))).await {
            Ok(output) => ActionResult::ok(json!({
                "ok": output.exit_code == 0,
                "method": "build",
                "project_dir": project_dir,
                "build_command": build_command,
                "exitCode": output.exit_code,
                "stdout": tail_chars(&output.stdout, STDOUT_TAIL),
                "stderr": tail_chars(&output.stderr, STDERR_TAIL),
            })),
            Err(failure) => with_method(failure.into_result(), "build"),
        }
    }

    async fn api_call(&self, params: &Params) -> ActionResult {
        let Some(url) = str_param(params, "url") else {
            return missing("api_call", "missing_url");
        };
        let expected = params.get("expected_status").and_then(Value::as_u64).unwrap_or(200);

        match self.http.get(url).send().await {
            Ok(response) => {
                let status = u64::from(response.status().as_u16());
                debug!(%url, status, expected, "Verifier::api_call: response");
                ActionResult::ok(json!({
                    "ok": status == expected,
                    "method": "api_call",
                    "url": url,
                    "status": status,
                    "expected_status": expected,
                }))
            }
            Err(e) if e.is_timeout() => ActionResult::new(
                408,
                json!({"ok": false, "method": "api_call", "url": url, "error": format!("timeout: {}", e)}),
            ),
            Err(e) => ActionResult::ok(json!({
                "ok": false,
                "method": "api_call",
                "url": url,
                "error": format!("connection failed: {}", e),
            })),
        }
    }
}

fn str_param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn missing(method: &str, error: &str) -> ActionResult {
    ActionResult::new(400, json!({"ok": false, "method": method, "error": error}))
}

fn with_method(mut result: ActionResult, method: &str) -> ActionResult {
    result.data.insert("method".to_string(), json!(method));
    result
}

/// Shared HTTP client for probes
pub fn probe_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}
