// src/generation/backend.rs
//! Text-generation backend contract and its HTTP implementation. Calls go
//! to a local proxy first when one is configured; a "route not found"
//! answer falls through to the direct backend with the identical payload.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Per-call timeout when neither the phase nor the caller sets one.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    /// Cost attribution identifiers, forwarded as request headers.
    pub organization_id: Option<String>,
    pub user_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            user_prompt: user_prompt.into(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            organization_id: None,
            user_id: None,
        }
    }

    pub fn effective_timeout_ms(&self) -> u64 {
        if self.timeout_ms == 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            self.timeout_ms
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.effective_timeout_ms())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    /// Model the backend actually served, which may differ from the request.
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub cached: bool,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse>;
}

pub struct HttpGenerationBackend {
    http: Client,
    backend_url: String,
    proxy_url: Option<String>,
    api_key: Option<String>,
}

impl HttpGenerationBackend {
    pub fn new(backend_url: String, proxy_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            backend_url,
            proxy_url,
            api_key,
        }
    }

    /// Wire payload shared by the proxy and the direct backend.
    fn payload(request: &GenerationRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.user_prompt}));
        json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }

    async fn post(
        &self,
        url: &str,
        request: &GenerationRequest,
        payload: &Value,
    ) -> Result<(u16, String)> {
        let mut builder = self
            .http
            .post(url)
            .json(payload)
            .timeout(request.timeout());
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(org) = &request.organization_id {
            builder = builder.header("x-organization-id", org);
        }
        if let Some(user) = &request.user_id {
            builder = builder.header("x-user-id", user);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(e, request))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(e, request))?;
        Ok((status, body))
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        let payload = Self::payload(request);

        if let Some(proxy) = &self.proxy_url {
            let (status, body) = self.post(proxy, request, &payload).await?;
            if is_route_not_found(status, &body) {
                debug!(proxy = %proxy, "proxy has no generation route, calling backend directly");
            } else if is_success(status) {
                return parse_generation_body(&request.model, status, &body);
            } else {
                return Err(EngineError::GenerationBackend { status, body });
            }
        }

        let (status, body) = self.post(&self.backend_url, request, &payload).await?;
        if !is_success(status) {
            return Err(EngineError::GenerationBackend { status, body });
        }
        parse_generation_body(&request.model, status, &body)
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_route_not_found(status: u16, body: &str) -> bool {
    status == 404 || body.to_ascii_lowercase().contains("route not found")
}

fn classify_transport_error(err: reqwest::Error, request: &GenerationRequest) -> EngineError {
    if err.is_timeout() {
        EngineError::GenerationTimeout {
            timeout_ms: request.effective_timeout_ms(),
        }
    } else {
        EngineError::GenerationBackend {
            status: 0,
            body: err.to_string(),
        }
    }
}

/// Pulls the generated text out of a 2xx body. The contract admits three
/// shapes, checked in priority order: `content`, `text`, then
/// `choices[0].message.content`.
fn parse_generation_body(requested_model: &str, status: u16, body: &str) -> Result<GenerationResponse> {
    let value: Value = serde_json::from_str(body).map_err(|e| EngineError::GenerationBackend {
        status,
        body: format!("unparseable generation response: {e}"),
    })?;

    let text = extract_text(&value).ok_or_else(|| EngineError::GenerationBackend {
        status,
        body: "generation response carries no text content".to_string(),
    })?;

    let model = value
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(requested_model)
        .to_string();

    let usage = value.get("usage").map(|u| {
        let prompt = u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
        let completion = u
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let total = u
            .get("total_tokens")
            .and_then(Value::as_u64)
            .map(|t| t as u32)
            .unwrap_or(prompt + completion);
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        }
    });

    let cached = value.get("cached").and_then(Value::as_bool).unwrap_or(false);

    Ok(GenerationResponse {
        text,
        model,
        usage,
        cached,
    })
}

fn extract_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("content").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let mut request = GenerationRequest::new("claude-sonnet-4-5", "write something");
        request.system_prompt = Some("be brief".to_string());
        request.temperature = 0.5;
        request.max_tokens = 512;

        let payload = HttpGenerationBackend::payload(&request);
        assert_eq!(payload["model"], "claude-sonnet-4-5");
        // 0.5 is exactly representable, so the f32 -> f64 widening is lossless
        assert_eq!(payload["temperature"], 0.5);
        assert_eq!(payload["max_tokens"], 512);
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["role"], "user");
        assert_eq!(payload["messages"][1]["content"], "write something");
    }

    #[test]
    fn test_payload_without_system_prompt_has_single_message() {
        let request = GenerationRequest::new("m", "hi");
        let payload = HttpGenerationBackend::payload(&request);
        assert_eq!(payload["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(payload["messages"][0]["role"], "user");
    }

    #[test]
    fn test_text_extraction_priority() {
        let body = r#"{"content":"from content","text":"from text"}"#;
        let response = parse_generation_body("m", 200, body).expect("parses");
        assert_eq!(response.text, "from content");

        let body = r#"{"text":"from text"}"#;
        let response = parse_generation_body("m", 200, body).expect("parses");
        assert_eq!(response.text, "from text");

        let body = r#"{"choices":[{"message":{"content":"from choices"}}]}"#;
        let response = parse_generation_body("m", 200, body).expect("parses");
        assert_eq!(response.text, "from choices");
    }

    #[test]
    fn test_scenario_content_field_yields_text_verbatim() {
        let response = parse_generation_body("m", 200, r#"{"content":"abc"}"#).expect("parses");
        assert_eq!(response.text, "abc");
        assert_eq!(response.model, "m");
        assert!(response.usage.is_none());
        assert!(!response.cached);
    }

    #[test]
    fn test_resolved_model_and_usage_and_cached() {
        let body = r#"{
            "content": "hi",
            "model": "claude-sonnet-4-5-20250929",
            "usage": {"prompt_tokens": 10, "completion_tokens": 5},
            "cached": true
        }"#;
        let response = parse_generation_body("claude-sonnet-4-5", 200, body).expect("parses");
        assert_eq!(response.model, "claude-sonnet-4-5-20250929");
        let usage = response.usage.expect("usage present");
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
        assert!(response.cached);
    }

    #[test]
    fn test_body_without_text_is_a_backend_error() {
        let result = parse_generation_body("m", 200, r#"{"id":"x"}"#);
        assert!(matches!(
            result,
            Err(EngineError::GenerationBackend { status: 200, .. })
        ));
        let result = parse_generation_body("m", 200, "not json");
        assert!(matches!(result, Err(EngineError::GenerationBackend { .. })));
    }

    #[test]
    fn test_route_not_found_detection() {
        assert!(is_route_not_found(404, ""));
        assert!(is_route_not_found(400, r#"{"error":"Route not found"}"#));
        assert!(!is_route_not_found(503, "service unavailable"));
        assert!(!is_route_not_found(200, r#"{"content":"ok"}"#));
    }

    #[test]
    fn test_timeout_defaulting() {
        let mut request = GenerationRequest::new("m", "p");
        request.timeout_ms = 0;
        assert_eq!(request.effective_timeout_ms(), DEFAULT_TIMEOUT_MS);
        request.timeout_ms = 1_500;
        assert_eq!(request.effective_timeout_ms(), 1_500);
    }
}
