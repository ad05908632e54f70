//! Verification-gated autonomous task orchestrator
//!
//! Given a goal, asks an LLM planner for one atomic action at a time,
//! dispatches it under a retry policy, and refuses to finish a task until a
//! verification probe has passed. Every step and attempt is persisted to a
//! replayable per-task log.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod store;
