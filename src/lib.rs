// lib.rs - Main library file that exports all modules
pub mod config;
pub mod defaults;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod services;
pub mod template;

use std::sync::Arc;

pub use error::{EngineError, Result};

/// Shared application state handed to every handler.
pub struct AppState {
    pub settings: config::Settings,
    pub registry: Arc<registry::WorkflowRegistry>,
    pub queue: Option<Arc<queue::JobQueueClient>>,
    pub generation: Arc<generation::GenerationService>,
    pub execution_mode: orchestrator::ExecutionMode,
    pub runs: orchestrator::WorkflowRuns,
}
