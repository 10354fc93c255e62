// src/queue.rs
//! Job queue client: fire-and-forget submission plus a cancellable
//! fixed-cadence polling loop that maps the provider's status vocabulary
//! onto workflow phases.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::models::GenerationJobConfig;
use crate::orchestrator::WorkflowPhase;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_FAILURE_MESSAGE: &str = "content generation failed";

/// Opaque handles returned by the external execution backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub queue_id: String,
    pub job_id: String,
    /// Stamped locally when the submission response arrives.
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: String,
    #[serde(default)]
    pub generation_error: Option<String>,
}

#[async_trait]
pub trait JobQueueTransport: Send + Sync {
    async fn submit(&self, config: &GenerationJobConfig) -> Result<JobHandle>;
    async fn status(&self, queue_id: &str) -> Result<JobStatusResponse>;
}

/// Fixed mapping from provider status strings onto phase/progress.
/// Anything unmapped is a non-terminal, continue-polling condition.
pub fn map_status(status: &str) -> Option<(WorkflowPhase, u8)> {
    match status.to_ascii_lowercase().as_str() {
        "pending" | "queued" => Some((WorkflowPhase::ContentGeneration, 10)),
        "generating" => Some((WorkflowPhase::ContentGeneration, 30)),
        "generating_images" => Some((WorkflowPhase::ImageGeneration, 40)),
        "enhancing" => Some((WorkflowPhase::ContentEnhancement, 50)),
        "interlinking" => Some((WorkflowPhase::Interlinking, 70)),
        "publishing" => Some((WorkflowPhase::PublishingPreparation, 90)),
        "generated" | "completed" => Some((WorkflowPhase::Completed, 100)),
        "failed" => Some((WorkflowPhase::Failed, 0)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

pub struct JobQueueClient {
    transport: Arc<dyn JobQueueTransport>,
    poll_interval: Duration,
    /// None preserves the provider-tolerant behavior of polling forever.
    max_poll_attempts: Option<u32>,
}

impl JobQueueClient {
    pub fn new(transport: Arc<dyn JobQueueTransport>) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_poll_attempts(mut self, cap: Option<u32>) -> Self {
        self.max_poll_attempts = cap;
        self
    }

    pub async fn submit(&self, config: &GenerationJobConfig) -> Result<JobHandle> {
        let handle = self.transport.submit(config).await?;
        info!(
            queue_id = %handle.queue_id,
            job_id = %handle.job_id,
            "submitted generation job"
        );
        Ok(handle)
    }

    /// Polls until a terminal status, cancellation, or (when configured)
    /// an exhausted attempt budget. `on_update` observes every mapped
    /// non-terminal status. Transient failures are logged and swallowed;
    /// the loop simply tries again on the next tick. Cancellation wins
    /// over both the sleep and an in-flight status request, so no further
    /// requests go out once the token fires.
    pub async fn poll_until_terminal<F, Fut>(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> PollOutcome
    where
        F: FnMut(WorkflowPhase, u8) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut attempts: u32 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                result = self.transport.status(&handle.queue_id) => result,
            };

            attempts += 1;

            match polled {
                Ok(response) => match map_status(&response.status) {
                    Some((WorkflowPhase::Completed, _)) => return PollOutcome::Completed,
                    Some((WorkflowPhase::Failed, _)) => {
                        let error = response
                            .generation_error
                            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                        return PollOutcome::Failed(error);
                    }
                    Some((phase, progress)) => on_update(phase, progress).await,
                    None => debug!(
                        queue_id = %handle.queue_id,
                        status = %response.status,
                        "unmapped job status, continuing to poll"
                    ),
                },
                Err(e) => {
                    warn!(
                        queue_id = %handle.queue_id,
                        error = %e,
                        "transient polling failure, will retry on next tick"
                    );
                }
            }

            if let Some(cap) = self.max_poll_attempts {
                if attempts >= cap {
                    return PollOutcome::Failed("polling attempt budget exhausted".to_string());
                }
            }
        }
    }
}

pub struct HttpJobQueueTransport {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpJobQueueTransport {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl JobQueueTransport for HttpJobQueueTransport {
    async fn submit(&self, config: &GenerationJobConfig) -> Result<JobHandle> {
        let mut builder = self.http.post(self.url("generation-jobs")).json(config);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::JobSubmission(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::JobSubmission(format!(
                "queue rejected submission ({status}): {body}"
            )));
        }
        response
            .json::<JobHandle>()
            .await
            .map_err(|e| EngineError::JobSubmission(format!("malformed submission response: {e}")))
    }

    async fn status(&self, queue_id: &str) -> Result<JobStatusResponse> {
        let mut builder = self
            .http
            .get(self.url(&format!("generation-jobs/{queue_id}/status")));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::PollingTransient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::PollingTransient(format!(
                "status request returned {status}: {body}"
            )));
        }
        response
            .json::<JobStatusResponse>()
            .await
            .map_err(|e| EngineError::PollingTransient(format!("malformed status response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct ScriptedTransport {
        statuses: Mutex<VecDeque<Result<JobStatusResponse>>>,
        status_calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(statuses: Vec<Result<JobStatusResponse>>) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.into()),
                status_calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }
    }

    fn status(s: &str) -> Result<JobStatusResponse> {
        Ok(JobStatusResponse {
            status: s.to_string(),
            generation_error: None,
        })
    }

    #[async_trait]
    impl JobQueueTransport for ScriptedTransport {
        async fn submit(&self, _config: &GenerationJobConfig) -> Result<JobHandle> {
            Ok(JobHandle {
                queue_id: "q-1".to_string(),
                job_id: "j-1".to_string(),
                submitted_at: Utc::now(),
            })
        }

        async fn status(&self, _queue_id: &str) -> Result<JobStatusResponse> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| status("generating"))
        }
    }

    fn handle() -> JobHandle {
        JobHandle {
            queue_id: "q-1".to_string(),
            job_id: "j-1".to_string(),
            submitted_at: Utc::now(),
        }
    }

    fn fast_client(transport: Arc<ScriptedTransport>) -> JobQueueClient {
        JobQueueClient::new(transport).with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_status_mapping_table() {
        assert_eq!(
            map_status("pending"),
            Some((WorkflowPhase::ContentGeneration, 10))
        );
        assert_eq!(
            map_status("generating"),
            Some((WorkflowPhase::ContentGeneration, 30))
        );
        assert_eq!(
            map_status("enhancing"),
            Some((WorkflowPhase::ContentEnhancement, 50))
        );
        assert_eq!(map_status("generated"), Some((WorkflowPhase::Completed, 100)));
        assert_eq!(map_status("COMPLETED"), Some((WorkflowPhase::Completed, 100)));
        assert_eq!(map_status("failed"), Some((WorkflowPhase::Failed, 0)));
        assert_eq!(map_status("warming_up_the_flux_capacitor"), None);
    }

    #[tokio::test]
    async fn test_poll_runs_to_completion_and_reports_progress() {
        let transport = ScriptedTransport::new(vec![
            status("pending"),
            status("generating"),
            status("mystery_state"),
            status("completed"),
        ]);
        let client = fast_client(transport.clone());
        let updates = Arc::new(Mutex::new(Vec::new()));

        let observed = updates.clone();
        let outcome = client
            .poll_until_terminal(&handle(), &CancellationToken::new(), move |phase, progress| {
                let observed = observed.clone();
                async move {
                    observed.lock().await.push((phase, progress));
                }
            })
            .await;

        assert_eq!(outcome, PollOutcome::Completed);
        assert_eq!(transport.calls(), 4);
        let updates = updates.lock().await;
        assert_eq!(
            *updates,
            vec![
                (WorkflowPhase::ContentGeneration, 10),
                (WorkflowPhase::ContentGeneration, 30),
            ]
        );
    }

    #[tokio::test]
    async fn test_poll_failure_carries_the_generation_error() {
        let transport = ScriptedTransport::new(vec![
            status("generating"),
            status("generating"),
            status("generating"),
            Ok(JobStatusResponse {
                status: "failed".to_string(),
                generation_error: Some("boom".to_string()),
            }),
        ]);
        let client = fast_client(transport);
        let outcome = client
            .poll_until_terminal(&handle(), &CancellationToken::new(), |_, _| async {})
            .await;
        assert_eq!(outcome, PollOutcome::Failed("boom".to_string()));
    }

    #[tokio::test]
    async fn test_poll_failure_without_detail_uses_fixed_message() {
        let transport = ScriptedTransport::new(vec![status("failed")]);
        let client = fast_client(transport);
        let outcome = client
            .poll_until_terminal(&handle(), &CancellationToken::new(), |_, _| async {})
            .await;
        assert_eq!(outcome, PollOutcome::Failed(DEFAULT_FAILURE_MESSAGE.to_string()));
    }

    #[tokio::test]
    async fn test_transient_errors_are_swallowed_and_polling_continues() {
        let transport = ScriptedTransport::new(vec![
            Err(EngineError::PollingTransient("connection reset".to_string())),
            Err(EngineError::PollingTransient("status request returned 500".to_string())),
            status("completed"),
        ]);
        let client = fast_client(transport.clone());
        let outcome = client
            .poll_until_terminal(&handle(), &CancellationToken::new(), |_, _| async {})
            .await;
        assert_eq!(outcome, PollOutcome::Completed);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_loop_before_the_next_request() {
        let transport = ScriptedTransport::new(vec![]);
        let client = Arc::new(fast_client(transport.clone()));
        let cancel = CancellationToken::new();

        let loop_client = client.clone();
        let loop_cancel = cancel.clone();
        let poller = tokio::spawn(async move {
            loop_client
                .poll_until_terminal(&handle(), &loop_cancel, |_, _| async {})
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        let outcome = poller.await.expect("poller joins");
        assert_eq!(outcome, PollOutcome::Cancelled);

        let frozen = transport.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.calls(), frozen);
    }

    #[tokio::test]
    async fn test_attempt_ceiling_fails_the_run_explicitly() {
        let transport = ScriptedTransport::new(vec![]);
        let client = fast_client(transport.clone()).with_max_poll_attempts(Some(3));
        let outcome = client
            .poll_until_terminal(&handle(), &CancellationToken::new(), |_, _| async {})
            .await;
        assert_eq!(
            outcome,
            PollOutcome::Failed("polling attempt budget exhausted".to_string())
        );
        assert_eq!(transport.calls(), 3);
    }
}
