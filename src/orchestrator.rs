// src/orchestrator.rs
//! Workflow state machine. One orchestrator owns one run: it resolves the
//! workflow model, moves the run through its phases (by submitting to the
//! job queue and polling, or by driving the phase executor in-process),
//! and answers state snapshots until the caller drops it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{EngineError, Result};
use crate::generation::{GenerationService, ORGANIZATION_KEY, USER_KEY};
use crate::models::{GenerationJobConfig, WorkflowModel};
use crate::queue::{JobQueueClient, PollOutcome};
use crate::registry::WorkflowRegistry;
use crate::template::TemplateValue;

/// Run phases in strict forward order. Each phase has a fixed progress
/// checkpoint; there are no backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Idle,
    ContentGeneration,
    ImageGeneration,
    ContentEnhancement,
    Interlinking,
    PublishingPreparation,
    Completed,
    Failed,
}

impl WorkflowPhase {
    pub fn checkpoint(&self) -> u8 {
        match self {
            WorkflowPhase::Idle => 0,
            WorkflowPhase::ContentGeneration => 10,
            WorkflowPhase::ImageGeneration => 30,
            WorkflowPhase::ContentEnhancement => 50,
            WorkflowPhase::Interlinking => 70,
            WorkflowPhase::PublishingPreparation => 90,
            WorkflowPhase::Completed => 100,
            WorkflowPhase::Failed => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowPhase::Completed | WorkflowPhase::Failed)
    }

    /// Checkpoint phase for a pipeline phase id (local execution). Phase
    /// ids outside the canonical five keep the current checkpoint.
    pub fn for_phase_id(id: &str) -> Option<Self> {
        match id {
            "content_generation" => Some(WorkflowPhase::ContentGeneration),
            "image_generation" => Some(WorkflowPhase::ImageGeneration),
            "content_enhancement" => Some(WorkflowPhase::ContentEnhancement),
            "interlinking" => Some(WorkflowPhase::Interlinking),
            "publishing_preparation" => Some(WorkflowPhase::PublishingPreparation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Idle => "idle",
            WorkflowPhase::ContentGeneration => "content_generation",
            WorkflowPhase::ImageGeneration => "image_generation",
            WorkflowPhase::ContentEnhancement => "content_enhancement",
            WorkflowPhase::Interlinking => "interlinking",
            WorkflowPhase::PublishingPreparation => "publishing_preparation",
            WorkflowPhase::Completed => "completed",
            WorkflowPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-phase result map for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseResults {
    pub content: Option<Value>,
    pub images: Option<Value>,
    pub enhancement: Option<Value>,
    pub interlinking: Option<Value>,
    pub publishing: Option<Value>,
}

impl PhaseResults {
    fn record(&mut self, phase_id: &str, value: Value) {
        match phase_id {
            "content_generation" => self.content = Some(value),
            "image_generation" => self.images = Some(value),
            "content_enhancement" | "content_enhancement_review" => {
                self.enhancement = Some(value)
            }
            "interlinking" => self.interlinking = Some(value),
            "publishing_preparation" => self.publishing = Some(value),
            other => warn!(phase = other, "phase id has no result slot, dropping output"),
        }
    }
}

/// Mutable state of a single run. Owned exclusively by one orchestrator;
/// callers only ever see snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub phase: WorkflowPhase,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: GenerationJobConfig,
    pub results: PhaseResults,
    /// Human-readable message, present only when the run failed.
    pub error: Option<String>,
    /// Cancellation is terminal but is not an error.
    pub cancelled: bool,
}

impl WorkflowState {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phase: WorkflowPhase::Idle,
            progress: 0,
            started_at: now,
            updated_at: now,
            config: GenerationJobConfig::default(),
            results: PhaseResults::default(),
            error: None,
            cancelled: false,
        }
    }

    /// Progress never moves backwards; the only exception is the reset to
    /// zero on entering `failed`.
    fn transition(&mut self, phase: WorkflowPhase, progress: u8) {
        self.phase = phase;
        self.progress = if phase == WorkflowPhase::Failed {
            0
        } else {
            self.progress.max(progress)
        };
        self.updated_at = Utc::now();
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.transition(WorkflowPhase::Failed, 0);
    }
}

/// How a run executes its phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Submit to the external job queue and track progress by polling.
    Queued,
    /// Run every phase in-process through the phase executor.
    Local,
}

pub struct WorkflowOrchestrator {
    registry: Arc<WorkflowRegistry>,
    queue: Option<Arc<JobQueueClient>>,
    generation: Arc<GenerationService>,
    mode: ExecutionMode,
    run_id: String,
    state: Arc<RwLock<WorkflowState>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl WorkflowOrchestrator {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        queue: Option<Arc<JobQueueClient>>,
        generation: Arc<GenerationService>,
        mode: ExecutionMode,
    ) -> Arc<Self> {
        let state = WorkflowState::new();
        let run_id = state.id.clone();
        Arc::new(Self {
            registry,
            queue,
            generation,
            mode,
            run_id,
            state: Arc::new(RwLock::new(state)),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.run_id
    }

    /// Snapshot of the run's current state.
    pub async fn state(&self) -> WorkflowState {
        self.state.read().await.clone()
    }

    /// Validates the config, resolves the workflow model, moves the run to
    /// its first phase and hands execution off to the background. Returns
    /// without waiting for any phase to complete.
    pub async fn start_workflow(&self, config: GenerationJobConfig) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Internal("workflow already started".to_string()));
        }

        if config.topic.trim().is_empty() {
            let mut state = self.state.write().await;
            state.config = config;
            state.error = Some("topic is required".to_string());
            state.updated_at = Utc::now();
            return Err(EngineError::Validation(vec!["topic".to_string()]));
        }

        let model = match self
            .registry
            .select_model(
                &config.quality_level,
                config.content_type.as_deref(),
                config.platform.as_deref(),
                config.workflow_model_id.as_deref(),
            )
            .await
        {
            Ok(model) => model,
            Err(e) => {
                let mut state = self.state.write().await;
                state.config = config;
                state.error = Some(e.to_string());
                state.updated_at = Utc::now();
                return Err(e);
            }
        };

        info!(
            run_id = %self.run_id,
            model_id = %model.id,
            mode = ?self.mode,
            topic = %config.topic,
            "starting content workflow"
        );

        // The external executor must run the pipeline the registry chose.
        let mut config = config;
        config.workflow_model_id = Some(model.id.clone());

        {
            let mut state = self.state.write().await;
            state.config = config.clone();
            state.transition(
                WorkflowPhase::ContentGeneration,
                WorkflowPhase::ContentGeneration.checkpoint(),
            );
        }

        match self.mode {
            ExecutionMode::Queued => self.start_queued(config).await,
            ExecutionMode::Local => {
                self.start_local(config, model);
                Ok(())
            }
        }
    }

    /// Cancels the run: aborts any in-flight call, stops the next poll
    /// tick, and marks the run cancelled. The last observed phase stays in
    /// place and no error is recorded.
    pub async fn cancel_workflow(&self) {
        info!(run_id = %self.run_id, "cancellation requested");
        self.cancel.cancel();
        let mut state = self.state.write().await;
        state.cancelled = true;
        state.updated_at = Utc::now();
    }

    async fn start_queued(&self, config: GenerationJobConfig) -> Result<()> {
        let Some(queue) = self.queue.clone() else {
            let err = EngineError::Internal("job queue not configured".to_string());
            self.state.write().await.fail(err.to_string());
            return Err(err);
        };

        let handle = match queue.submit(&config).await {
            Ok(handle) => handle,
            Err(e) => {
                self.state.write().await.fail(e.to_string());
                return Err(e);
            }
        };

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let run_id = self.run_id.clone();
        tokio::spawn(async move {
            let shared = Arc::clone(&state);
            let outcome = queue
                .poll_until_terminal(&handle, &cancel, move |phase, progress| {
                    let shared = Arc::clone(&shared);
                    async move {
                        shared.write().await.transition(phase, progress);
                    }
                })
                .await;
            settle(&state, &run_id, outcome).await;
        });

        Ok(())
    }

    fn start_local(&self, config: GenerationJobConfig, model: WorkflowModel) {
        let generation = Arc::clone(&self.generation);
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let run_id = self.run_id.clone();
        tokio::spawn(async move {
            let outcome =
                match run_phases(&generation, &state, &cancel, &run_id, &config, &model).await {
                    Ok(()) => PollOutcome::Completed,
                    Err(EngineError::Cancelled) => PollOutcome::Cancelled,
                    Err(e) => PollOutcome::Failed(e.to_string()),
                };
            settle(&state, &run_id, outcome).await;
        });
    }
}

/// Applies a terminal outcome to the run state.
async fn settle(state: &RwLock<WorkflowState>, run_id: &str, outcome: PollOutcome) {
    match outcome {
        PollOutcome::Completed => {
            let mut state = state.write().await;
            state.transition(WorkflowPhase::Completed, 100);
            state.error = None;
            info!(run_id = %run_id, "workflow completed");
        }
        PollOutcome::Failed(message) => {
            state.write().await.fail(message.clone());
            error!(run_id = %run_id, error = %message, "workflow failed");
        }
        PollOutcome::Cancelled => {
            let mut state = state.write().await;
            state.cancelled = true;
            state.updated_at = Utc::now();
            info!(run_id = %run_id, "workflow cancelled");
        }
    }
}

/// Local driver. Phases run strictly sequentially; each phase's outputs
/// fold into the inputs of the next.
async fn run_phases(
    generation: &GenerationService,
    state: &RwLock<WorkflowState>,
    cancel: &CancellationToken,
    run_id: &str,
    config: &GenerationJobConfig,
    model: &WorkflowModel,
) -> Result<()> {
    let mut inputs = config.template_vars();
    if let Some(org) = &config.organization_id {
        inputs.set(ORGANIZATION_KEY, TemplateValue::text(org));
    }
    if let Some(user) = &config.user_id {
        inputs.set(USER_KEY, TemplateValue::text(user));
    }

    for phase in &model.phases {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if let Some(checkpoint) = WorkflowPhase::for_phase_id(&phase.id) {
            state
                .write()
                .await
                .transition(checkpoint, checkpoint.checkpoint());
        }

        info!(run_id = %run_id, phase = %phase.id, "executing phase");

        let execution = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = generation.execute_phase(phase, &inputs) => result?,
        };

        let mut outputs = serde_json::Map::new();
        for key in &phase.outputs {
            if let Some(value) = execution.values.get(key) {
                outputs.insert(key.clone(), value.to_json());
            }
        }
        state
            .write()
            .await
            .results
            .record(&phase.id, Value::Object(outputs));

        inputs.merge(&execution.values);
    }

    Ok(())
}

/// Live runs backing the HTTP surface, keyed by run id.
#[derive(Clone, Default)]
pub struct WorkflowRuns {
    inner: Arc<RwLock<HashMap<String, Arc<WorkflowOrchestrator>>>>,
}

impl WorkflowRuns {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, run: Arc<WorkflowOrchestrator>) {
        self.inner
            .write()
            .await
            .insert(run.id().to_string(), run);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<WorkflowOrchestrator>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }
}
