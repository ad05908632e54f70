//! orch - verification-gated autonomous task orchestrator
//!
//! CLI entry point: runs tasks in-process and inspects persisted ones.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use futures::StreamExt;
use tracing::{debug, info, warn};

use orchestrator::cli::{Cli, Command, OutputFormat, get_log_path, render_entry, render_replay, render_summaries, render_task};
use orchestrator::config::Config;
use orchestrator::domain::TaskStatus;
use orchestrator::orchestrator::Orchestrator;
use orchestrator::store::{TaskFeed, TaskStore};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    info!(model = %config.llm.model, data_dir = ?config.storage.data_dir, "Loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { goal, max_steps } => {
            if let Some(max_steps) = max_steps {
                config.engine.max_steps = max_steps;
            }
            let status = cmd_run(&config, &goal).await?;
            if status != TaskStatus::Done {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::List { format } => cmd_list(&config, format).await,
        Command::Show { id, format } => cmd_show(&config, &id, format).await,
        Command::Tail { id, lines } => cmd_tail(&config, &id, lines).await,
        Command::Replay { id } => cmd_replay(&config, &id).await,
    }
}

async fn cmd_run(config: &Config, goal: &str) -> Result<TaskStatus> {
    debug!(%goal, max_steps = config.engine.max_steps, "cmd_run: called");
    let orchestrator = Orchestrator::from_config(config)?;
    let task_id = orchestrator.create_task(goal).await.context("Failed to create task")?;
    println!("{} {}", "Task".bold(), task_id.dimmed());

    // Full backlog so nothing written before the feed opened is missed
    let mut feed = TaskFeed::open(orchestrator.store(), &task_id, usize::MAX)
        .await
        .context("Failed to open task feed")?;

    loop {
        tokio::select! {
            entry = feed.next() => match entry {
                Some(entry) => println!("{}", render_entry(&entry)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!(%task_id, "Interrupted, stopping task");
                eprintln!("{}", "Interrupted, stopping task...".yellow());
                orchestrator.stop_task(&task_id);
            }
        }
    }

    let task = orchestrator.wait(&task_id).await.context("Failed to read final task state")?;
    info!(%task_id, status = %task.status, steps = task.steps.len(), "Task finished");
    Ok(task.status)
}

async fn cmd_list(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_list: called");
    let store = TaskStore::new(config.storage.data_dir.clone());
    let summaries = store.list().await.context("Failed to list tasks")?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Text => print!("{}", render_summaries(&summaries)),
    }
    Ok(())
}

async fn cmd_show(config: &Config, id: &str, format: OutputFormat) -> Result<()> {
    debug!(%id, ?format, "cmd_show: called");
    let store = TaskStore::new(config.storage.data_dir.clone());
    let task = store.load(id).await.context(format!("Failed to load task {}", id))?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&task)?),
        OutputFormat::Text => print!("{}", render_task(&task)),
    }
    Ok(())
}

async fn cmd_tail(config: &Config, id: &str, lines: usize) -> Result<()> {
    debug!(%id, lines, "cmd_tail: called");
    let store = TaskStore::new(config.storage.data_dir.clone());
    for entry in store.tail(id, lines).await.context(format!("Failed to read log of task {}", id))? {
        println!("{}", render_entry(&entry));
    }
    Ok(())
}

async fn cmd_replay(config: &Config, id: &str) -> Result<()> {
    debug!(%id, "cmd_replay: called");
    let store = TaskStore::new(config.storage.data_dir.clone());
    let task = store.load(id).await.context(format!("Failed to replay task {}", id))?;
    print!("{}", render_replay(&task));
    Ok(())
}
