//! Completion client: model-agnostic provider abstraction.
//!
//! Defines the `CompletionProvider` trait, an implementation for
//! OpenAI-compatible endpoints (Ollama, vLLM, LM Studio), and a retry
//! helper with exponential backoff for transient failures.

use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Content, Message, Role};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for completion providers.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Execute an async operation with exponential backoff retry on transient
/// errors.
///
/// Retries on `RateLimited` (respecting `retry_after_secs`), `Connection`,
/// and `Timeout`. Permanent errors (`Rejected`, `ResponseParse`) return
/// immediately. When retries are exhausted the last transient error is
/// wrapped in `LlmError::Unavailable` so callers can distinguish
/// "endpoint kept failing" from "endpoint refused the request".
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = config.max_retries + 1;
    let mut last_err = None;
    for attempt in 0..attempts {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                if attempt + 1 == attempts {
                    last_err = Some(e);
                    break;
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                warn!(
                    attempt = attempt + 1,
                    max = attempts,
                    backoff_ms,
                    error = %e,
                    "Retrying after transient completion error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
        }
    }
    let last = last_err.map(|e| e.to_string()).unwrap_or_default();
    Err(LlmError::Unavailable {
        attempts,
        message: last,
    })
}

/// Check whether an error is transient.
pub fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let LlmError::RateLimited { retry_after_secs } = err {
        return (retry_after_secs * 1000).max(computed);
    }
    computed
}

/// Pure exponential backoff with a cap. No jitter: pipeline runs are
/// expected to be reproducible.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    base.min(config.max_backoff_ms as f64) as u64
}

/// Wraps a provider with the retry policy so every completion call gets
/// backoff on transient failures.
pub struct RetryingProvider<P> {
    inner: P,
    retry: RetryConfig,
}

impl<P: CompletionProvider> RetryingProvider<P> {
    pub fn new(inner: P, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for RetryingProvider<P> {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        with_retry(&self.retry, || self.inner.complete(request.clone())).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Completion provider for OpenAI-compatible chat completion endpoints.
///
/// Ollama exposes this surface at `/v1/chat/completions`; local endpoints
/// need no API key.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    request_timeout_secs: u64,
}

impl OllamaProvider {
    /// Create a new provider from configuration.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            request_timeout_secs: config.request_timeout_secs,
        })
    }

    /// Convert internal messages to the OpenAI JSON format.
    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                match &msg.content {
                    Content::Text { text } => json!({
                        "role": role,
                        "content": text,
                    }),
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => json!({
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": arguments.to_string(),
                            }
                        }]
                    }),
                    Content::ToolResult {
                        call_id, output, ..
                    } => json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "content": output,
                    }),
                    Content::MultiPart { parts } => {
                        let mut text_parts = Vec::new();
                        let mut tool_calls = Vec::new();
                        for part in parts {
                            match part {
                                Content::Text { text } => text_parts.push(text.clone()),
                                Content::ToolCall {
                                    id,
                                    name,
                                    arguments,
                                } => tool_calls.push(json!({
                                    "id": id,
                                    "type": "function",
                                    "function": {
                                        "name": name,
                                        "arguments": arguments.to_string(),
                                    }
                                })),
                                _ => {}
                            }
                        }
                        if tool_calls.is_empty() {
                            json!({ "role": role, "content": text_parts.join("\n") })
                        } else {
                            json!({
                                "role": "assistant",
                                "content": if text_parts.is_empty() {
                                    Value::Null
                                } else {
                                    Value::String(text_parts.join("\n"))
                                },
                                "tool_calls": tool_calls,
                            })
                        }
                    }
                }
            })
            .collect()
    }

    /// Convert tool definitions to the OpenAI format.
    fn tools_to_json(tools: &[crate::types::ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    /// Parse an OpenAI-format response body into a `CompletionResponse`.
    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string());

        let content = if let Some(tool_calls) = message.get("tool_calls") {
            let calls: Vec<Content> = tool_calls
                .as_array()
                .unwrap_or(&vec![])
                .iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let args_str = func.get("arguments")?.as_str()?;
                    let arguments: Value = serde_json::from_str(args_str).unwrap_or(json!({}));
                    Some(Content::ToolCall {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect();

            match calls.len() {
                0 => Content::text(
                    message
                        .get("content")
                        .and_then(|c| c.as_str())
                        .unwrap_or(""),
                ),
                1 => calls.into_iter().next().unwrap_or(Content::text("")),
                _ => {
                    let mut parts = Vec::new();
                    if let Some(text) = message.get("content").and_then(|c| c.as_str())
                        && !text.is_empty()
                    {
                        parts.push(Content::text(text));
                    }
                    parts.extend(calls);
                    Content::MultiPart { parts }
                }
            }
        } else {
            Content::text(
                message
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or(""),
            )
        };

        let resp_model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string();

        Ok(CompletionResponse {
            message: Message::new(Role::Assistant, content),
            model: resp_model,
            finish_reason,
        })
    }

    /// Classify an HTTP error status.
    ///
    /// 429 is rate limiting, honoring the Retry-After header when the
    /// server sends one. Other 4xx means the request itself was
    /// malformed and must not be retried, 5xx is a transient service
    /// failure.
    fn map_http_error(
        status: reqwest::StatusCode,
        retry_after: Option<u64>,
        body: &str,
    ) -> LlmError {
        let message = body.chars().take(500).collect::<String>();
        if status.as_u16() == 429 {
            LlmError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(1),
            }
        } else if status.is_client_error() {
            LlmError::Rejected {
                status: status.as_u16(),
                message,
            }
        } else {
            LlmError::Connection {
                message: format!("HTTP {status}: {message}"),
            }
        }
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut body = json!({
            "model": self.model,
            "messages": Self::messages_to_json(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(tools) = &request.tools
            && !tools.is_empty()
        {
            body["tools"] = json!(Self::tools_to_json(tools));
        }
        if let Some(format) = &request.format {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": format,
            });
        }

        debug!(url = %url, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.request_timeout_secs,
                    }
                } else {
                    LlmError::Connection {
                        message: format!("Request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, retry_after, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        Self::parse_response(&json, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock completion provider for tests.
///
/// Returns queued responses in order. When the queue is empty, returns a
/// canned text response. With `fail_when_tools` set, every request that
/// carries tool definitions errors with a transient connection failure,
/// which exercises the chat session's context-only fallback.
pub struct MockProvider {
    responses: std::sync::Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    requests: std::sync::Mutex<Vec<CompletionRequest>>,
    fail_when_tools: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(Vec::new()),
            requests: std::sync::Mutex::new(Vec::new()),
            fail_when_tools: false,
        }
    }

    /// Create a provider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        for _ in 0..20 {
            provider.queue_response(Self::text_response(text));
        }
        provider
    }

    /// Create a provider that errors whenever tools are offered, and
    /// otherwise returns the given text.
    pub fn failing_on_tools(text: &str) -> Self {
        let mut provider = Self::with_response(text);
        provider.fail_when_tools = true;
        provider
    }

    /// Queue a response for the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses.lock().unwrap().push(Ok(response));
    }

    /// Queue an error for the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push(Err(error));
    }

    /// Create a simple text response.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Create a tool call response.
    pub fn tool_call_response(tool_name: &str, arguments: Value) -> CompletionResponse {
        CompletionResponse {
            message: Message::new(
                Role::Assistant,
                Content::tool_call(format!("call_{tool_name}"), tool_name, arguments),
            ),
            model: "mock-model".to_string(),
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    /// All requests seen so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let has_tools = request.tools.as_ref().is_some_and(|t| !t.is_empty());
        self.requests.lock().unwrap().push(request);
        if self.fail_when_tools && has_tools {
            return Err(LlmError::Connection {
                message: "mock: tool-call request failed".to_string(),
            });
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(Self::text_response("Mock response."))
        } else {
            responses.remove(0)
        }
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
