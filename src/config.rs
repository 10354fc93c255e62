// src/config.rs
//! Process configuration, read once from the environment at startup.

use crate::defaults;
use crate::error::{EngineError, Result};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_GENERATION_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    /// Direct text-generation backend (OpenAI-compatible chat endpoint).
    pub generation_backend_url: String,
    /// Local proxy tried first when set; a "route not found" answer falls
    /// through to the direct backend.
    pub generation_proxy_url: Option<String>,
    pub generation_api_key: Option<String>,
    /// Unset means there is no external queue and phases run in-process.
    pub job_queue_url: Option<String>,
    pub job_queue_api_key: Option<String>,
    pub poll_interval_ms: u64,
    /// Unset preserves the queue's poll-forever tolerance.
    pub max_poll_attempts: Option<u32>,
    pub default_workflow_model: String,
    pub generation_timeout_ms: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Lookup-injected parser so tests never touch process-global env state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse_u64 = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw.parse::<u64>().map_err(|_| {
                    EngineError::Internal(format!("{key} must be an integer, got '{raw}'"))
                }),
                None => Ok(default),
            }
        };

        let max_poll_attempts = match lookup("MAX_POLL_ATTEMPTS") {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
                EngineError::Internal(format!("MAX_POLL_ATTEMPTS must be an integer, got '{raw}'"))
            })?),
            None => None,
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            generation_backend_url: lookup("GENERATION_BACKEND_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            generation_proxy_url: lookup("GENERATION_PROXY_URL"),
            generation_api_key: lookup("GENERATION_API_KEY"),
            job_queue_url: lookup("JOB_QUEUE_URL"),
            job_queue_api_key: lookup("JOB_QUEUE_API_KEY"),
            poll_interval_ms: parse_u64("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            max_poll_attempts,
            default_workflow_model: lookup("DEFAULT_WORKFLOW_MODEL")
                .unwrap_or_else(|| defaults::DEFAULT_MODEL_ID.to_string()),
            generation_timeout_ms: parse_u64(
                "GENERATION_TIMEOUT_MS",
                DEFAULT_GENERATION_TIMEOUT_MS,
            )?,
        })
    }
}
