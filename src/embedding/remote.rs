//! HTTP embedding backends: OpenAI-compatible and Ollama.
//!
//! Each backend issues a single request per call; retries are layered on
//! top by [`super::Embedder`]. Responses are classified as:
//!
//! | Response | Error |
//! |----------|-------|
//! | 429 | [`EmbeddingError::RateLimited`] (with `Retry-After` if sent) |
//! | 5xx, timeout, connect failure | [`EmbeddingError::Transient`] |
//! | other 4xx, malformed body | [`EmbeddingError::Fatal`] |

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::EmbeddingBackend;
use crate::error::EmbeddingError;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

fn build_client(timeout: Duration) -> Result<reqwest::Client, EmbeddingError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EmbeddingError::Fatal(format!("failed to build HTTP client: {e}")))
}

/// Parse a `Retry-After` header given in whole seconds.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let value = response.headers().get(reqwest::header::RETRY_AFTER)?;
    let secs = value.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

/// Turn a non-success status into the matching error class.
async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, EmbeddingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let wait = retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    let message = format!("{provider} API error {status}: {body}");

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(EmbeddingError::RateLimited {
            message,
            retry_after: wait,
        })
    } else if status.is_server_error() {
        Err(EmbeddingError::Transient(message))
    } else {
        Err(EmbeddingError::Fatal(message))
    }
}

// ============ OpenAI ============

pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiItem>,
}

#[derive(Deserialize)]
struct OpenAiItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiBackend {
    /// When `api_key` is `None` the key is taken from `OPENAI_API_KEY` here,
    /// at construction. A missing key still builds the backend; the first
    /// embedding call then fails with a non-retryable error.
    pub fn new(
        url: Option<&str>,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let base = url.unwrap_or(DEFAULT_OPENAI_URL).trim_end_matches('/');
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: format!("{base}/v1/embeddings"),
            model: model.to_string(),
            api_key: api_key.or_else(|| std::env::var("OPENAI_API_KEY").ok()),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            EmbeddingError::Fatal("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status("OpenAI", response).await?;

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Fatal(format!("invalid OpenAI response: {e}")))?;

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}

// ============ Ollama ============

pub struct OllamaBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaBackend {
    pub fn new(url: Option<&str>, model: &str, timeout: Duration) -> Result<Self, EmbeddingError> {
        let base = url.unwrap_or(DEFAULT_OLLAMA_URL).trim_end_matches('/');
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: format!("{base}/api/embed"),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| match EmbeddingError::from(e) {
                EmbeddingError::Transient(msg) => EmbeddingError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {msg}",
                    self.endpoint
                )),
                other => other,
            })?;
        let response = check_status("Ollama", response).await?;

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Fatal(format!("invalid Ollama response: {e}")))?;
        Ok(parsed.embeddings)
    }
}
