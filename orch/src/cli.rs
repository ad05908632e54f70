//! CLI command definitions and output rendering

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;

use crate::domain::{Role, Task, TaskStatus, TaskSummary};
use crate::engine::can_complete;
use crate::store::{EntryKind, LogEntry};

/// Verification-gated autonomous task orchestrator
#[derive(Parser)]
#[command(name = "orch", about = "Plan, dispatch and verify automation tasks", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a task to completion, streaming its log
    Run {
        /// Goal for the planner
        goal: String,

        /// Override engine max-steps
        #[arg(short, long)]
        max_steps: Option<usize>,
    },

    /// List persisted tasks
    List {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a persisted task with its steps
    Show {
        id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the last log entries of a task
    Tail {
        id: String,

        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        lines: usize,
    },

    /// Rebuild a task from its log and summarize it
    Replay { id: String },
}

/// Output format for list/show
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Log file location used by the binary
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orchestrator")
        .join("logs")
        .join("orchestrator.log")
}

fn colored_status(status: TaskStatus) -> String {
    let s = status.as_str();
    match status {
        TaskStatus::Done => s.green().to_string(),
        TaskStatus::Error => s.red().to_string(),
        TaskStatus::Stopped => s.yellow().to_string(),
        TaskStatus::Running => s.cyan().to_string(),
        TaskStatus::Queued => s.dimmed().to_string(),
    }
}

/// One log entry as a coloured terminal line
pub fn render_entry(entry: &LogEntry) -> String {
    let seq = format!("#{:<4}", entry.seq).dimmed();
    match &entry.kind {
        EntryKind::Message { role, content } => {
            let tag = format!("[{}]", role);
            let tag = match role {
                Role::User => tag.bright_cyan().bold(),
                Role::Planner => tag.blue(),
                Role::Assistant => tag.green().bold(),
                Role::System => {
                    if content.starts_with("ERROR") {
                        tag.red()
                    } else {
                        tag.yellow()
                    }
                }
            };
            format!("{} {} {}", seq, tag, content)
        }
        EntryKind::Status {
            status,
            error,
            stop_reason,
        } => {
            let mut line = format!("{} {} {}", seq, "status".bold(), colored_status(*status));
            if let Some(reason) = stop_reason {
                line.push_str(&format!(" ({})", reason));
            }
            if let Some(error) = error {
                line.push_str(&format!(": {}", error.red()));
            }
            line
        }
    }
}

pub fn render_summaries(summaries: &[TaskSummary]) -> String {
    if summaries.is_empty() {
        return "No tasks.".dimmed().to_string();
    }
    let mut out = String::new();
    for s in summaries {
        let created = chrono::DateTime::from_timestamp_millis(s.created_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let indent = "  ".repeat(s.depth as usize);
        out.push_str(&format!(
            "{}  {}  {:<8}  {:>3} steps{}  {}{}\n",
            s.id.dimmed(),
            created,
            colored_status(s.status),
            s.steps,
            if s.has_screenshots { " [shots]" } else { "" },
            indent,
            s.goal
        ));
    }
    out
}

pub fn render_task(task: &Task) -> String {
    let mut out = format!(
        "{} {}\n{} {}\n{} {}\n",
        "Task:".bold(),
        task.id,
        "Goal:".bold(),
        task.goal,
        "Status:".bold(),
        colored_status(task.status)
    );
    if let Some(parent) = &task.parent_id {
        out.push_str(&format!("{} {} (depth {})\n", "Parent:".bold(), parent, task.depth));
    }
    if let Some(reason) = task.stop_reason {
        out.push_str(&format!("{} {}\n", "Stop reason:".bold(), reason));
    }
    if let Some(error) = &task.error {
        out.push_str(&format!("{} {}\n", "Error:".red(), error));
    }

    for step in &task.steps {
        let status = step.last_result().map(|r| r.status.to_string()).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "\n{} {} {} (status {}, {} attempts)\n",
            "Step".bold(),
            step.index,
            step.planned.action.to_string().yellow(),
            status,
            step.attempts.len()
        ));
        if !step.planned.thought.is_empty() {
            out.push_str(&format!("  thought: {}\n", step.planned.thought.dimmed()));
        }
        for attempt in &step.attempts {
            out.push_str(&format!(
                "  attempt {} after {}ms -> {}\n",
                attempt.attempt_number, attempt.delay_ms, attempt.result.status
            ));
        }
        if !step.context.learned_issues.is_empty() {
            let issues: Vec<&str> = step.context.learned_issues.iter().map(|e| e.as_str()).collect();
            out.push_str(&format!("  issues: {}\n", issues.join(", ")));
        }
        if step.context.stalled {
            out.push_str(&format!("  {}\n", "stalled".yellow()));
        }
        if let Some(shot) = &step.screenshot {
            out.push_str(&format!("  screenshot: {}\n", shot));
        }
    }
    out
}

/// One-screen digest of a task rebuilt from its log
pub fn render_replay(task: &Task) -> String {
    let attempts: usize = task.steps.iter().map(|s| s.attempts.len()).sum();
    let stalled = task.steps.iter().filter(|s| s.context.stalled).count();
    let mut out = format!(
        "{} {} [{}]\n  steps: {}  attempts: {}  stalled: {}  verified: {}\n  messages: {}\n",
        "Replay".bold(),
        task.id,
        colored_status(task.status),
        task.steps.len(),
        attempts,
        stalled,
        if can_complete(task) { "yes".green() } else { "no".yellow() },
        task.history.len()
    );
    for entry in task.history.iter().rev().take(5).rev() {
        let content: String = entry.content.chars().take(120).collect();
        out.push_str(&format!("  [{}] {}\n", entry.role, content));
    }
    out
}
