//! Embedding backends and the batching front end.
//!
//! An [`EmbeddingBackend`] turns a batch of texts into vectors with a single
//! call. [`Embedder`] wraps one backend and adds everything around it:
//! mode prefixes, sequential batching, retries, and response validation.
//!
//! | Provider | Backend |
//! |----------|---------|
//! | `disabled` | [`DisabledBackend`] |
//! | `openai` | [`remote::OpenAiBackend`] |
//! | `ollama` | [`remote::OllamaBackend`] |
//! | `local` | `local::FastEmbedBackend` (feature `local-embeddings`) |
//! | `hash` | [`hashed::HashBackend`] |
//!
//! Also provides the vector helpers used by the store:
//! [`vec_to_blob`], [`blob_to_vec`], and [`cosine_similarity`].

pub mod hashed;
pub mod local;
pub mod remote;
pub mod retry;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;
use retry::BackoffPolicy;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Provider name, e.g. `"openai"`.
    fn name(&self) -> &str;

    /// Embed one batch with a single attempt.
    async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// What a configured backend produces and how its inputs are decorated.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub model: String,
    pub dims: usize,
    pub query_prefix: Option<String>,
    pub passage_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Document,
    Query,
}

/// Backend used when `embedding.provider = "disabled"`.
pub struct DisabledBackend;

#[async_trait]
impl EmbeddingBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn embed_raw(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    caps: Capabilities,
    batch_size: usize,
    policy: BackoffPolicy,
}

impl Embedder {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        caps: Capabilities,
        batch_size: usize,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            backend,
            caps,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    /// Build from a validated [`EmbeddingConfig`].
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let caps = Capabilities {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| config.provider.clone()),
            dims: config.dims.unwrap_or(0),
            query_prefix: config.query_prefix.clone(),
            passage_prefix: config.passage_prefix.clone(),
        };
        Ok(Self::new(
            create_backend(config)?,
            caps,
            config.batch_size,
            config.retry.policy(),
        ))
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn provider(&self) -> &str {
        self.backend.name()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.name() != "disabled"
    }

    /// Embed one batch (at most [`Self::batch_size`] texts) with retries.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prefix = match mode {
            EmbedMode::Document => self.caps.passage_prefix.as_deref(),
            EmbedMode::Query => self.caps.query_prefix.as_deref(),
        };
        let inputs: Vec<String> = match prefix {
            Some(p) => texts.iter().map(|t| format!("{p}{t}")).collect(),
            None => texts.to_vec(),
        };

        let vectors = retry::retry(&self.policy, self.backend.name(), || {
            self.backend.embed_raw(&inputs)
        })
        .await?;

        self.validate(texts.len(), &vectors)?;
        Ok(vectors)
    }

    /// Embed documents sequentially in batches, preserving input order.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(chunk, EmbedMode::Document).await?);
        }
        Ok(out)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self
            .embed_batch(&[text.to_string()], EmbedMode::Query)
            .await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    fn validate(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }
        if self.caps.dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.caps.dims) {
                return Err(EmbeddingError::Dimension {
                    expected: self.caps.dims,
                    actual: bad.len(),
                });
            }
        }
        Ok(())
    }
}

/// Instantiate the backend named by `config.provider`.
pub fn create_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let model = config.model.as_deref().unwrap_or_default();

    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledBackend)),
        "openai" => Ok(Arc::new(remote::OpenAiBackend::new(
            config.url.as_deref(),
            model,
            None,
            timeout,
        )?)),
        "ollama" => Ok(Arc::new(remote::OllamaBackend::new(
            config.url.as_deref(),
            model,
            timeout,
        )?)),
        "hash" => Ok(Arc::new(hashed::HashBackend::new(config.dims.unwrap_or(256))?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(local::FastEmbedBackend::new(
            config.model.as_deref().unwrap_or(local::DEFAULT_LOCAL_MODEL),
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(EmbeddingError::ModelLoad(
            "local embedding provider requires building with --features local-embeddings".into(),
        )),
        other => Err(EmbeddingError::Fatal(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every batch it receives and answers with fixed-size vectors.
    struct Recording {
        dims: usize,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmbeddingBackend for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.lock().unwrap().push(texts.to_vec());
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32; self.dims])
                .collect())
        }
    }

    fn caps(dims: usize, prefixed: bool) -> Capabilities {
        Capabilities {
            model: "test".into(),
            dims,
            query_prefix: prefixed.then(|| "query: ".to_string()),
            passage_prefix: prefixed.then(|| "passage: ".to_string()),
        }
    }

    #[tokio::test]
    async fn batches_sequentially_in_order() {
        let backend = Arc::new(Recording {
            dims: 3,
            calls: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(backend.clone(), caps(3, false), 2, BackoffPolicy::default());

        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vectors = embedder.embed_documents(&texts).await.unwrap();

        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[3], vec![4.0; 3]);
        let calls = backend.calls.lock().unwrap();
        let sizes: Vec<usize> = calls.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn prefixes_follow_mode() {
        let backend = Arc::new(Recording {
            dims: 2,
            calls: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(backend.clone(), caps(2, true), 8, BackoffPolicy::default());

        embedder.embed_query("find parser").await.unwrap();
        embedder.embed_documents(&["fn parse()".into()]).await.unwrap();

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["query: find parser".to_string()]);
        assert_eq!(calls[1], vec!["passage: fn parse()".to_string()]);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let backend = Arc::new(Recording {
            dims: 4,
            calls: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(backend, caps(8, false), 8, BackoffPolicy::default());
        let err = embedder.embed_query("x").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::Dimension {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn disabled_backend_errors() {
        let embedder = Embedder::from_config(&EmbeddingConfig::default()).unwrap();
        assert!(!embedder.is_enabled());
        assert!(matches!(
            embedder.embed_query("x").await,
            Err(EmbeddingError::Disabled)
        ));
    }

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
