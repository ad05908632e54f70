//! run_shell - execute a script with the configured shell

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{ActionResult, Params};

/// Captured output is cut to this many trailing chars
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Finished process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// -1 when the process was killed by a signal
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// `{ok, exitCode, stdout, stderr}` with status 200
    pub fn into_result(self) -> ActionResult {
        ActionResult::ok(json!({
            "ok": self.exit_code == 0,
            "exitCode": self.exit_code,
            "stdout": self.stdout,
            "stderr": self.stderr,
        }))
    }
}

/// Why a process produced no output
#[derive(Debug)]
pub enum ProcessFailure {
    Timeout(Duration),
    Spawn(std::io::Error),
}

impl ProcessFailure {
    /// 408 for timeouts, 500 for spawn failures
    pub fn into_result(self) -> ActionResult {
        match self {
            ProcessFailure::Timeout(d) => {
                ActionResult::new(408, json!({"ok": false, "error": format!("timeout after {}ms", d.as_millis())}))
            }
            ProcessFailure::Spawn(e) => ActionResult::new(500, json!({"ok": false, "error": format!("spawn failed: {}", e)})),
        }
    }
}

/// Run `command` to completion, optionally feeding `stdin`, bounded by `timeout`
///
/// The child is killed if the timeout fires.
pub async fn run_process(
    mut command: Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessFailure> {
    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(ProcessFailure::Spawn)?;
    let feed = stdin.zip(child.stdin.take());

    // stdin is written while output drains, all under one deadline
    let run = async move {
        let write = async move {
            if let Some((input, mut pipe)) = feed {
                // a child that exits without reading stdin is not an error
                if let Err(e) = pipe.write_all(&input).await {
                    debug!(error = %e, "run_process: stdin write failed");
                }
            }
        };
        let ((), output) = tokio::join!(write, child.wait_with_output());
        output
    };

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ProcessFailure::Spawn(e)),
        Err(_) => {
            debug!(?timeout, "run_process: timed out");
            return Err(ProcessFailure::Timeout(timeout));
        }
    };

    let exit_code = output.status.code().map(i64::from).unwrap_or(-1);
    debug!(exit_code, stdout_len = output.stdout.len(), stderr_len = output.stderr.len(), "run_process: completed");
    Ok(ProcessOutput {
        exit_code,
        stdout: tail_chars(&String::from_utf8_lossy(&output.stdout), MAX_OUTPUT_CHARS),
        stderr: tail_chars(&String::from_utf8_lossy(&output.stderr), MAX_OUTPUT_CHARS),
    })
}

/// Keep the last `max` chars
pub fn tail_chars(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max {
        return s.to_string();
    }
    s.chars().skip(len - max).collect()
}

/// Runs scripts via `<shell> -c`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>, timeout: Duration, working_dir: Option<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            timeout,
            working_dir,
        }
    }

    /// Run `script`; `cwd` wins over the configured working dir
    pub async fn run(&self, script: &str, cwd: Option<&Path>) -> Result<ProcessOutput, ProcessFailure> {
        debug!(shell = %self.shell, %script, ?cwd, "ShellRunner::run: called");
        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(script);
        if let Some(dir) = cwd.or(self.working_dir.as_deref()) {
            command.current_dir(dir);
        }
        run_process(command, None, self.timeout).await
    }

    /// The `run_shell` action: `params.script` (or `params.command`), optional `params.cwd`
    pub async fn run_action(&self, params: &Params) -> ActionResult {
        let script = ["script", "command"]
            .iter()
            .find_map(|k| params.get(*k).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty()));
        let Some(script) = script else {
            debug!("ShellRunner::run_action: missing script");
            return ActionResult::new(400, json!({"error": "missing_script"}));
        };
        let cwd = params.get("cwd").and_then(|v| v.as_str()).map(Path::new);

        match self.run(script, cwd).await {
            Ok(output) => output.into_result(),
            Err(failure) => failure.into_result(),
        }
    }
}
