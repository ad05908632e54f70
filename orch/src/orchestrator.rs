//! Orchestrator - boundary facade over the engine, store and registry
//!
//! Creates tasks and starts exactly one loop per task, answers queries from
//! the registry (falling back to disk), and hands out live feeds.

use std::sync::Arc;

use eyre::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatch::{ActionRouter, Dispatcher};
use crate::domain::{Task, TaskSummary};
use crate::engine::{EngineSettings, TaskEngine};
use crate::llm::create_client;
use crate::planner::{LlmPlanner, Planner};
use crate::registry::TaskRegistry;
use crate::store::{StoreError, TaskFeed, TaskStore};

pub struct Orchestrator {
    engine: Arc<TaskEngine>,
    store: Arc<TaskStore>,
    registry: TaskRegistry,
    tail_lines: usize,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        dispatcher: Arc<dyn Dispatcher>,
        store: Arc<TaskStore>,
        settings: EngineSettings,
        tail_lines: usize,
    ) -> Self {
        debug!(root = ?store.root(), tail_lines, "Orchestrator::new: called");
        let registry = TaskRegistry::new();
        let engine = TaskEngine::new(planner, dispatcher, store.clone(), registry.clone(), settings);
        Self {
            engine: Arc::new(engine),
            store,
            registry,
            tail_lines,
        }
    }

    /// Wire the LLM planner, action router and on-disk store from config
    pub fn from_config(config: &Config) -> Result<Self> {
        debug!(model = %config.llm.model, data_dir = ?config.storage.data_dir, "Orchestrator::from_config: called");
        let llm = create_client(&config.llm).context("Failed to create LLM client")?;
        let planner = Arc::new(LlmPlanner::new(llm, config.llm.max_tokens));
        let dispatcher = Arc::new(ActionRouter::new(&config.dispatch).context("Failed to create action router")?);
        let store = Arc::new(TaskStore::new(config.storage.data_dir.clone()));
        let settings = EngineSettings::new(&config.engine, config.storage.artifacts_dir.clone());
        Ok(Self::new(planner, dispatcher, store, settings, config.storage.tail_lines))
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Persist a new task, register it and start its loop
    pub async fn create_task(&self, goal: impl Into<String>) -> Result<String, StoreError> {
        let task = Task::new(goal);
        let task_id = task.id.clone();
        debug!(%task_id, goal = %task.goal, "Orchestrator::create_task: called");

        self.store.create(&task).await?;
        self.registry.publish(&task);

        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = self.engine.clone();
        let handle = tokio::spawn(async move {
            engine.run(task, stop_rx).await;
        });
        if !self.registry.attach(&task_id, handle, stop_tx) {
            warn!(%task_id, "Loop handle was not attached");
        }

        info!(%task_id, "Task created");
        Ok(task_id)
    }

    /// Latest snapshot from the registry, or the persisted task
    pub async fn get_task(&self, task_id: &str) -> Result<Task, StoreError> {
        debug!(%task_id, "Orchestrator::get_task: called");
        match self.registry.get(task_id) {
            Some(task) => Ok(task),
            None => self.store.load(task_id).await,
        }
    }

    /// Summaries of every known task, newest first
    pub fn list_tasks(&self) -> Vec<TaskSummary> {
        self.registry.list()
    }

    pub async fn stream_task(&self, task_id: &str) -> Result<TaskFeed, StoreError> {
        debug!(%task_id, tail = self.tail_lines, "Orchestrator::stream_task: called");
        TaskFeed::open(&self.store, task_id, self.tail_lines).await
    }

    /// Ask a running task to stop; false if it has no loop or already finished
    pub fn stop_task(&self, task_id: &str) -> bool {
        debug!(%task_id, "Orchestrator::stop_task: called");
        self.registry.stop(task_id)
    }

    /// Wait for the task's loop to finish and return its final state
    pub async fn wait(&self, task_id: &str) -> Result<Task, StoreError> {
        debug!(%task_id, "Orchestrator::wait: called");
        if let Some(handle) = self.registry.take_handle(task_id)
            && let Err(e) = handle.await
        {
            error!(%task_id, error = %e, "Task loop aborted");
        }
        self.get_task(task_id).await
    }

    /// Load every persisted task into the registry without restarting any
    pub async fn restore(&self) -> Result<usize, StoreError> {
        debug!(root = ?self.store.root(), "Orchestrator::restore: called");
        let mut restored = 0;
        for summary in self.store.list().await? {
            if self.registry.contains(&summary.id) {
                continue;
            }
            match self.store.load(&summary.id).await {
                Ok(task) => {
                    if !task.status.is_terminal() {
                        warn!(task_id = %task.id, status = %task.status, "Restored unfinished task, not restarting");
                    }
                    self.registry.publish(&task);
                    restored += 1;
                }
                Err(e) => warn!(task_id = %summary.id, error = %e, "Failed to restore task"),
            }
        }
        info!(restored, "Restored persisted tasks");
        Ok(restored)
    }
}
