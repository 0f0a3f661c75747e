// Copyright 2025 Martin Pool

//! A thin client for the model endpoint that proposes mutation bodies.
//!
//! Grounded on the retry-wrapped HTTP client shape of
//! `examples/NomicFoundation-edr/crates/edr_rpc_client/src/client.rs`, here
//! reduced to a single bounded retry loop (no caching layer: every request
//! is for a distinct, one-shot completion), using `reqwest` the way the rest
//! of the pack reaches for it rather than hand-rolling a client over
//! `std::net`. The trait seam mirrors how the teacher hides `Console`/
//! `LogFile` behind small interfaces that tests substitute with recording
//! doubles.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Capability every mutation strategy calls through: given a system prompt
/// (the task framing) and a user prompt (the emptied file plus hint), return
/// the model's raw completion text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    system_prompt: &'a str,
    user_prompt: &'a str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    text: String,
}

/// Configuration for [`HttpModelClient`], normally populated from the
/// `[model]` config table and the `SWEMUTATE_MODEL_*` environment variables.
#[derive(Debug, Clone)]
pub struct ModelClientConfig {
    pub endpoint: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub max_retries: u32,
    pub request_timeout: Duration,
}

/// The production [`ModelClient`]: an HTTP completion endpoint reached over
/// `reqwest`, with bounded retry on transient failures.
pub struct HttpModelClient {
    http: reqwest::Client,
    config: ModelClientConfig,
}

impl HttpModelClient {
    pub fn new(config: ModelClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("build model http client")?;
        Ok(HttpModelClient { http, config })
    }

    async fn try_once(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: &self.config.model_id,
            system_prompt,
            user_prompt,
            temperature: 0.2,
        };
        let mut builder = self.http.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.context("send model request")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("model endpoint returned {status}: {body}");
        }
        let parsed: CompletionResponse = response.json().await.context("parse model response json")?;
        Ok(parsed.text)
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    /// Request a completion, retrying transient failures (network errors,
    /// 5xx responses, and 429) up to `max_retries` times with exponential
    /// backoff. A 4xx other than 429 is not retried: it means the request
    /// itself is malformed, and retrying would just repeat the failure.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.try_once(system_prompt, user_prompt).await {
                Ok(text) => return Ok(text),
                Err(err) if attempt < self.config.max_retries && is_retryable(&err) => {
                    let backoff = Duration::from_millis(250 * 2u64.pow(attempt));
                    warn!(attempt, ?backoff, "model request failed, retrying: {err:#}");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_retryable(err: &anyhow::Error) -> bool {
    let message = err.to_string();
    message.contains("returned 5") || message.contains("returned 429") || message.contains("send model request")
}

/// A test double that returns pre-scripted completions in order, and
/// records every prompt it was asked to complete so tests can assert on
/// what the strategies actually sent.
pub struct RecordingModelClient {
    scripted_responses: Mutex<Vec<String>>,
    prompts_seen: Mutex<Vec<(String, String)>>,
}

impl RecordingModelClient {
    pub fn new(scripted_responses: Vec<String>) -> Self {
        RecordingModelClient {
            scripted_responses: Mutex::new(scripted_responses),
            prompts_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts_seen(&self) -> Vec<(String, String)> {
        self.prompts_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for RecordingModelClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.prompts_seen
            .lock()
            .unwrap()
            .push((system_prompt.to_owned(), user_prompt.to_owned()));
        let mut responses = self.scripted_responses.lock().unwrap();
        if responses.is_empty() {
            bail!("RecordingModelClient ran out of scripted responses");
        }
        Ok(responses.remove(0))
    }
}

/// Strip a fenced code block (```python ... ``` or plain ``` ... ```) from a
/// model response, returning just the body text. Models are asked for "body
/// only" but routinely wrap it in markdown fences anyway.
pub fn extract_code(raw_output: &str) -> String {
    let trimmed = raw_output.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("python").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim_end().to_owned();
        }
        return rest.trim_end().to_owned();
    }
    trimmed.to_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retryable_on_server_errors_and_rate_limit() {
        assert!(is_retryable(&anyhow::anyhow!("model endpoint returned 503: oops")));
        assert!(is_retryable(&anyhow::anyhow!("model endpoint returned 429: slow down")));
    }

    #[test]
    fn not_retryable_on_client_errors() {
        assert!(!is_retryable(&anyhow::anyhow!("model endpoint returned 400: bad request")));
    }

    #[test]
    fn extract_code_strips_fenced_python_block() {
        let raw = "```python\n    return x + 1\n```";
        assert_eq!(extract_code(raw), "    return x + 1");
    }

    #[test]
    fn extract_code_passes_through_plain_text() {
        assert_eq!(extract_code("    return x + 1\n"), "return x + 1");
    }

    #[tokio::test]
    async fn recording_client_returns_scripted_responses_in_order() {
        let client = RecordingModelClient::new(vec!["first".to_owned(), "second".to_owned()]);
        assert_eq!(client.complete("sys", "a").await.unwrap(), "first");
        assert_eq!(client.complete("sys", "b").await.unwrap(), "second");
        assert_eq!(client.prompts_seen(), vec![("sys".to_owned(), "a".to_owned()), ("sys".to_owned(), "b".to_owned())]);
    }
}
