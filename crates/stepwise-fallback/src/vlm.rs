//! VLM HTTP client: request building, retries, response parsing, health.
//!
//! Transport is a seam so retry and parsing behavior stay testable without
//! a live service. The production transport is a thin reqwest wrapper.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::FallbackError;
use crate::image::CapturedImage;

/// Probe timeout for the health check.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// One transport-level reply: HTTP status plus parsed JSON body.
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// HTTP status code.
    pub status: u16,
    /// Response body. `Value::Null` when the body was not JSON.
    pub body: Value,
}

/// POST-a-JSON-body seam for the chat endpoint.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post `body` to `url`, honoring `timeout`.
    async fn post_chat(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportReply, FallbackError>;
}

/// reqwest-backed transport.
pub struct HttpChatTransport {
    client: reqwest::Client,
}

impl HttpChatTransport {
    /// Build the transport with a fresh client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpChatTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn post_chat(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportReply, FallbackError> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FallbackError::VlmTimeout(timeout.as_secs())
                } else {
                    FallbackError::VlmUnavailable(e.to_string())
                }
            })?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(TransportReply { status, body })
    }
}

/// Message content for one chat request.
#[derive(Debug, Clone)]
pub enum ChatContent {
    /// Plain text content.
    Text(String),
    /// Text plus an attached image, sent as an ordered part list.
    TextWithImage {
        /// The text part.
        text: String,
        /// The image part, base64-encoded.
        image: CapturedImage,
    },
}

impl ChatContent {
    fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::TextWithImage { text, image } => json!([
                { "type": "text", "text": text },
                {
                    "type": "image_url",
                    "image_url": {
                        "url": format!(
                            "data:image/{};base64,{}",
                            image.format, image.data_b64
                        )
                    }
                }
            ]),
        }
    }
}

/// Client counter snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct VlmStats {
    /// Top-level send calls.
    pub requests_total: u64,
    /// Individual attempts, including retries.
    pub attempts_total: u64,
    /// Successful sends.
    pub success_count: u64,
    /// Failed attempts (each retry counts).
    pub error_count: u64,
    /// Mean latency of successful attempts.
    pub avg_latency_ms: f64,
    /// Service URL.
    pub url: String,
    /// Configured timeout in seconds.
    pub timeout_secs: u64,
    /// Configured retries after the first attempt.
    pub max_retries: u32,
}

/// Health probe outcome.
#[derive(Debug, Clone, Serialize)]
pub struct VlmHealth {
    /// Whether the probe got a 2xx back.
    pub healthy: bool,
    /// HTTP status when a reply arrived.
    pub status: Option<u16>,
    /// Probe round-trip time.
    pub latency_ms: f64,
    /// Service URL.
    pub url: String,
    /// Transport error text, when the probe failed outright.
    pub error: Option<String>,
}

/// Client for the VLM chat-completions endpoint with retry and backoff.
pub struct VlmClient {
    transport: Arc<dyn ChatTransport>,
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
    log_requests: bool,
    requests_total: AtomicU64,
    attempts_total: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    success_latency_us: AtomicU64,
}

impl VlmClient {
    /// Build a client.
    #[must_use]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        base_url: &str,
        timeout_secs: u64,
        max_retries: u32,
        log_requests: bool,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs,
            max_retries,
            log_requests,
            requests_total: AtomicU64::new(0),
            attempts_total: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            success_latency_us: AtomicU64::new(0),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Send one delegated query, retrying with exponential backoff.
    ///
    /// # Errors
    /// The last attempt's error once retries are exhausted: `VlmUnavailable`
    /// for transport failures and non-2xx statuses, `VlmTimeout` for
    /// timeouts, `VlmParse` for unusable bodies.
    pub async fn send_query(
        &self,
        content: ChatContent,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, FallbackError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "messages": [ { "role": "user", "content": content.to_value() } ],
            "max_tokens": max_tokens,
            "temperature": temperature,
            "metadata": { "source": "fallback_query", "skip_state_tracker": true }
        });

        let mut last_error = FallbackError::VlmUnavailable("no attempt made".to_string());
        for attempt in 0..=self.max_retries {
            self.attempts_total.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            match self.attempt(&body).await {
                Ok(text) => {
                    self.success_count.fetch_add(1, Ordering::Relaxed);
                    self.success_latency_us
                        .fetch_add(elapsed_us(started), Ordering::Relaxed);
                    if self.log_requests {
                        tracing::debug!(
                            attempt = attempt + 1,
                            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
                            "VLM query succeeded"
                        );
                    }
                    return Ok(text);
                }
                Err(e) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    if attempt < self.max_retries {
                        let wait = Duration::from_secs(1u64 << attempt.min(16));
                        if self.log_requests {
                            tracing::warn!(
                                attempt = attempt + 1,
                                retry_in_secs = wait.as_secs(),
                                error = %e,
                                "VLM attempt failed; retrying"
                            );
                        }
                        tokio::time::sleep(wait).await;
                    } else {
                        tracing::error!(
                            attempts = attempt + 1,
                            error = %e,
                            "VLM request failed after all retries"
                        );
                    }
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn attempt(&self, body: &Value) -> Result<String, FallbackError> {
        let reply = self
            .transport
            .post_chat(
                &self.chat_url(),
                body,
                Duration::from_secs(self.timeout_secs),
            )
            .await?;
        if !(200..300).contains(&reply.status) {
            return Err(FallbackError::VlmUnavailable(format!(
                "HTTP {}",
                reply.status
            )));
        }
        extract_content(&reply.body)
    }

    /// Probe the service with a tiny request.
    pub async fn health(&self) -> VlmHealth {
        let body = json!({
            "messages": [ { "role": "user", "content": "Hello, are you working?" } ],
            "max_tokens": 10,
            "temperature": 0.1
        });
        let started = Instant::now();
        let outcome = self
            .transport
            .post_chat(&self.chat_url(), &body, HEALTH_TIMEOUT)
            .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok(reply) => VlmHealth {
                healthy: (200..300).contains(&reply.status),
                status: Some(reply.status),
                latency_ms,
                url: self.base_url.clone(),
                error: None,
            },
            Err(e) => VlmHealth {
                healthy: false,
                status: None,
                latency_ms,
                url: self.base_url.clone(),
                error: Some(e.to_string()),
            },
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> VlmStats {
        let success = self.success_count.load(Ordering::Relaxed);
        let latency_us = self.success_latency_us.load(Ordering::Relaxed);
        let avg_latency_ms = if success == 0 {
            0.0
        } else {
            latency_us as f64 / success as f64 / 1000.0
        };
        VlmStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            attempts_total: self.attempts_total.load(Ordering::Relaxed),
            success_count: success,
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms,
            url: self.base_url.clone(),
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.requests_total.store(0, Ordering::Relaxed);
        self.attempts_total.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.success_latency_us.store(0, Ordering::Relaxed);
    }
}

/// Pull the answer text out of `choices[0].message.content`.
///
/// Three shapes are accepted: a plain string, a part list whose text parts
/// are concatenated, and an object carrying a `text` field.
fn extract_content(body: &Value) -> Result<String, FallbackError> {
    let content = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .ok_or_else(|| FallbackError::VlmParse("no message content in response".to_string()))?;

    match content {
        Value::String(text) => Ok(text.trim().to_string()),
        Value::Array(parts) => {
            let mut out = Vec::new();
            for part in parts {
                match part {
                    Value::String(text) => out.push(text.clone()),
                    Value::Object(map) => {
                        if map.get("type").and_then(Value::as_str) == Some("text")
                            && let Some(text) = map.get("text").and_then(Value::as_str)
                        {
                            out.push(text.to_string());
                        }
                    }
                    _ => {}
                }
            }
            Ok(out.join(" ").trim().to_string())
        }
        Value::Object(map) => match map.get("text").and_then(Value::as_str) {
            Some(text) => Ok(text.trim().to_string()),
            None => Ok(content.to_string()),
        },
        Value::Null => Err(FallbackError::VlmParse(
            "null message content".to_string(),
        )),
        other => Ok(other.to_string()),
    }
}

fn elapsed_us(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_body(content: Value) -> Value {
        json!({ "choices": [ { "message": { "content": content } } ] })
    }

    #[test]
    fn extracts_plain_string_content() {
        let body = chat_body(json!("  the answer  "));
        assert_eq!(extract_content(&body).unwrap(), "the answer");
    }

    #[test]
    fn extracts_and_joins_part_lists() {
        let body = chat_body(json!([
            { "type": "text", "text": "first" },
            { "type": "image_url", "image_url": { "url": "ignored" } },
            "second"
        ]));
        assert_eq!(extract_content(&body).unwrap(), "first second");
    }

    #[test]
    fn extracts_text_field_from_object_content() {
        let body = chat_body(json!({ "text": "object answer" }));
        assert_eq!(extract_content(&body).unwrap(), "object answer");
    }

    #[test]
    fn missing_content_is_a_parse_error() {
        let body = json!({ "choices": [] });
        assert!(matches!(
            extract_content(&body),
            Err(FallbackError::VlmParse(_))
        ));
    }

    #[test]
    fn image_content_renders_a_data_url() {
        let content = ChatContent::TextWithImage {
            text: "What do you see?".to_string(),
            image: CapturedImage {
                data_b64: "QUJD".to_string(),
                format: "jpeg".to_string(),
                size: 3,
                processed: true,
                timestamp: chrono::Utc::now(),
            },
        };
        let value = content.to_value();
        let parts = value.as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["type"], "image_url");
        let url = parts[1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,QUJD"));
    }
}
