//! HTTP model invoker for OpenAI-compatible chat completion endpoints.
//!
//! One `invoke` is at most one HTTP request. Failures are classified:
//! - transport errors, timeouts, 408, 429 and 5xx are transient
//! - any other non-success status and malformed bodies are permanent

use crate::client::{ModelInvoker, RateLimiter, RecognitionRequest};
use crate::models::{OpenRouterConfig, RecognitionError, RecognitionErrorKind, ScribeError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Message with multi-part content.
#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Model invoker for any OpenAI-compatible endpoint (OpenRouter by default).
///
/// The API key is injected at construction and only ever placed in the
/// `Authorization` header.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_tokens: u32,
    temperature: f64,
    rate_limiter: Arc<RateLimiter>,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl LlmClient {
    /// Create a new client.
    pub fn new(
        api_key: Option<String>,
        base_url: String,
        timeout_secs: u64,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<Self, ScribeError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_tokens,
            temperature,
            rate_limiter: Arc::new(RateLimiter::new()),
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    /// Create a client from the `[openrouter]` settings and a resolved key.
    pub fn from_settings(config: &OpenRouterConfig, api_key: String) -> Result<Self, ScribeError> {
        Self::new(
            Some(api_key),
            config.base_url.clone(),
            config.timeout_secs,
            config.max_tokens,
            config.temperature,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Total (input, output) tokens reported by the endpoint.
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(ref api_key) = self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("pagescribe"));

        headers
    }

    fn build_request(&self, request: &RecognitionRequest<'_>) -> ChatCompletionRequest {
        let mut content = vec![ContentPart::Text {
            text: request.prompt.to_string(),
        }];

        if let Some(image) = request.image {
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!(
                        "data:{};base64,{}",
                        image.mime_type,
                        BASE64_STANDARD.encode(image.bytes)
                    ),
                },
            });
        }

        ChatCompletionRequest {
            model: request.model.to_string(),
            messages: vec![Message {
                role: "user",
                content,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Extract the completion text from a successful response body.
    fn parse_completion(model: &str, body: &str) -> Result<(String, Option<ChatUsage>), RecognitionError> {
        let parsed: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
            RecognitionError::permanent(model, format!("failed to parse response: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RecognitionError::permanent(model, "no choices in response"))?
            .message
            .content
            .ok_or_else(|| RecognitionError::permanent(model, "response message has no content"))?;

        let text = content.trim();
        if text.is_empty() {
            return Err(RecognitionError::permanent(model, "empty completion"));
        }

        Ok((text.to_string(), parsed.usage))
    }
}

/// Classify a non-success HTTP status.
pub fn classify_status(status: u16) -> RecognitionErrorKind {
    match status {
        408 | 429 | 500..=599 => RecognitionErrorKind::Transient,
        _ => RecognitionErrorKind::Permanent,
    }
}

#[async_trait]
impl ModelInvoker for LlmClient {
    async fn invoke(&self, request: RecognitionRequest<'_>) -> Result<String, RecognitionError> {
        let model = request.model;
        let payload = self.build_request(&request);
        let url = format!("{}/chat/completions", self.base_url);

        self.rate_limiter.wait_if_needed(model).await;

        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RecognitionError::transient(
                        model,
                        format!("request timed out after {:?}", self.timeout),
                    )
                } else {
                    RecognitionError::transient(model, format!("network error: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        self.rate_limiter
            .record_request(model, status, response.headers());

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .map(|e| e.error.message)
                .unwrap_or(error_body);

            debug!(model = model, status = status, "Recognition call rejected");

            return Err(RecognitionError {
                kind: classify_status(status),
                model: model.to_string(),
                cause: format!("HTTP {status}: {message}"),
            });
        }

        let body = response.text().await.map_err(|e| {
            RecognitionError::transient(model, format!("failed reading response body: {e}"))
        })?;

        let (content, usage) = Self::parse_completion(model, &body)?;

        if let Some(usage) = usage {
            self.total_input_tokens
                .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
            self.total_output_tokens
                .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);
        }

        Ok(content)
    }
}
