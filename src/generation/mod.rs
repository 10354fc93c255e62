// src/generation/mod.rs
//! Phase executor: renders a phase's prompt templates, calls the
//! generation backend under a bounded retry budget, and parses single- or
//! multi-field output into the phase's declared keys.

pub mod backend;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::models::PhaseSpec;
use crate::services::pricing;
use crate::template::{render_template, TemplateValue, TemplateVars};

pub use backend::{
    GenerationBackend, GenerationRequest, GenerationResponse, HttpGenerationBackend, TokenUsage,
    DEFAULT_TIMEOUT_MS,
};

/// Reserved diagnostic keys attached to every phase execution. The leading
/// underscore keeps them out of template substitution.
pub const RAW_RESPONSE_KEY: &str = "_raw_response";
pub const MODEL_KEY: &str = "_model";
pub const USAGE_KEY: &str = "_usage";

/// Reserved plumbing keys for cost attribution, carried in the input map
/// but never rendered into a prompt.
pub const ORGANIZATION_KEY: &str = "_organization_id";
pub const USER_KEY: &str = "_user_id";

const RETRY_DELAY: Duration = Duration::from_millis(250);

/// How the generated text mapped onto the phase's declared output keys.
/// Callers must branch on the tag; there is no implicit best-effort cast.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOutput {
    /// A balanced JSON object was found; the declared keys it supplied.
    Fields(Vec<(String, Value)>),
    /// No structured payload: the raw text stands in.
    Raw(String),
}

#[derive(Debug, Clone)]
pub struct PhaseExecution {
    /// Declared output keys plus the reserved diagnostic keys.
    pub values: TemplateVars,
    pub parsed: ParsedOutput,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

pub struct GenerationService {
    backend: Arc<dyn GenerationBackend>,
    default_timeout_ms: u64,
}

impl GenerationService {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_default_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Required keys that are absent or explicitly null. Raising is left to
    /// the caller.
    pub fn validate_inputs(phase: &PhaseSpec, inputs: &TemplateVars) -> Vec<String> {
        phase
            .required_inputs
            .iter()
            .filter(|key| match inputs.get(key) {
                None => true,
                Some(value) => value.is_null(),
            })
            .cloned()
            .collect()
    }

    pub async fn execute_phase(
        &self,
        phase: &PhaseSpec,
        inputs: &TemplateVars,
    ) -> Result<PhaseExecution> {
        let missing = Self::validate_inputs(phase, inputs);
        if !missing.is_empty() {
            return Err(EngineError::Validation(missing));
        }

        let system_prompt = phase
            .system_prompt
            .as_deref()
            .map(|template| render_template(template, inputs))
            .filter(|rendered| !rendered.is_empty());
        let user_prompt = render_template(&phase.user_prompt, inputs);

        let request = GenerationRequest {
            model: phase.model.clone(),
            system_prompt,
            user_prompt,
            temperature: phase.temperature,
            max_tokens: phase.max_tokens,
            timeout_ms: if phase.timeout_ms == 0 {
                self.default_timeout_ms
            } else {
                phase.timeout_ms
            },
            organization_id: reserved_text(inputs, ORGANIZATION_KEY),
            user_id: reserved_text(inputs, USER_KEY),
        };

        let response = self.generate_with_retry(phase, &request).await?;
        pricing::log_usage(
            &response,
            request.organization_id.as_deref(),
            request.user_id.as_deref(),
        );

        let (mut values, parsed) = parse_phase_outputs(&phase.outputs, &response.text);
        values.set(RAW_RESPONSE_KEY, TemplateValue::text(&response.text));
        values.set(MODEL_KEY, TemplateValue::text(&response.model));
        values.set(USAGE_KEY, usage_value(response.usage.as_ref()));

        Ok(PhaseExecution {
            values,
            parsed,
            model: response.model,
            usage: response.usage,
        })
    }

    /// Backend failures and timeouts are retried up to the phase's budget;
    /// the final error propagates untouched.
    async fn generate_with_retry(
        &self,
        phase: &PhaseSpec,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse> {
        let budget = if phase.retryable { phase.max_retries } else { 0 };
        let mut attempt = 0u32;
        loop {
            match self.backend.generate(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < budget => {
                    attempt += 1;
                    warn!(
                        phase = %phase.id,
                        attempt,
                        budget,
                        error = %e,
                        "generation attempt failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn reserved_text(inputs: &TemplateVars, key: &str) -> Option<String> {
    inputs
        .get(key)
        .map(TemplateValue::render)
        .filter(|s| !s.is_empty())
}

fn usage_value(usage: Option<&TokenUsage>) -> TemplateValue {
    match usage {
        Some(u) => TemplateValue::Map(vec![
            (
                "prompt_tokens".to_string(),
                TemplateValue::Number(u.prompt_tokens as f64),
            ),
            (
                "completion_tokens".to_string(),
                TemplateValue::Number(u.completion_tokens as f64),
            ),
            (
                "total_tokens".to_string(),
                TemplateValue::Number(u.total_tokens as f64),
            ),
        ]),
        None => TemplateValue::Null,
    }
}

/// Assigns generated text to the phase's declared output keys.
///
/// One declared key takes the raw text verbatim. Several declared keys
/// trigger structured extraction: the first balanced JSON object found in
/// the text supplies each key, keys it misses fall back to the full raw
/// text, and a text with no parseable JSON leaves everything but the first
/// key unset.
fn parse_phase_outputs(outputs: &[String], text: &str) -> (TemplateVars, ParsedOutput) {
    let mut values = TemplateVars::new();

    if outputs.len() == 1 {
        values.set(outputs[0].as_str(), TemplateValue::text(text));
        return (values, ParsedOutput::Raw(text.to_string()));
    }

    match extract_json(text) {
        Some(Value::Object(object)) => {
            let mut fields = Vec::new();
            for key in outputs {
                match object.get(key) {
                    Some(value) => {
                        fields.push((key.clone(), value.clone()));
                        values.set(key.as_str(), TemplateValue::from_json(value));
                    }
                    None => values.set(key.as_str(), TemplateValue::text(text)),
                }
            }
            (values, ParsedOutput::Fields(fields))
        }
        Some(_) => {
            // Balanced JSON, but an array carries no named fields: every
            // declared key falls back to the raw text.
            for key in outputs {
                values.set(key.as_str(), TemplateValue::text(text));
            }
            (values, ParsedOutput::Raw(text.to_string()))
        }
        None => {
            values.set(outputs[0].as_str(), TemplateValue::text(text));
            (values, ParsedOutput::Raw(text.to_string()))
        }
    }
}

/// Locates the first balanced JSON object or array substring that parses.
/// Candidate openers are scanned left to right with string/escape
/// awareness.
pub fn extract_json(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    for (start, &b) in bytes.iter().enumerate() {
        if b != b'{' && b != b'[' {
            continue;
        }
        if let Some(end) = balanced_end(bytes, start) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Some(value);
            }
        }
    }
    None
}

fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
