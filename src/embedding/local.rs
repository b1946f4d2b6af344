//! In-process embedding models.
//!
//! The model table is always compiled so configuration can resolve dims and
//! E5-style prefixes without the model runtime. The fastembed backend itself
//! sits behind the `local-embeddings` feature.
//!
//! Models load lazily through [`LazyModel`]: the first embedding call
//! triggers the load, and concurrent first callers wait on that single load
//! rather than starting their own.

use anyhow::{bail, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;

use crate::error::EmbeddingError;

pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Static metadata for a supported local model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalModelSpec {
    pub name: &'static str,
    pub dims: usize,
    pub query_prefix: Option<&'static str>,
    pub passage_prefix: Option<&'static str>,
}

const fn plain(name: &'static str, dims: usize) -> LocalModelSpec {
    LocalModelSpec {
        name,
        dims,
        query_prefix: None,
        passage_prefix: None,
    }
}

const fn e5(name: &'static str, dims: usize) -> LocalModelSpec {
    LocalModelSpec {
        name,
        dims,
        query_prefix: Some("query: "),
        passage_prefix: Some("passage: "),
    }
}

const LOCAL_MODELS: &[LocalModelSpec] = &[
    plain("all-minilm-l6-v2", 384),
    plain("bge-small-en-v1.5", 384),
    plain("bge-base-en-v1.5", 768),
    plain("bge-large-en-v1.5", 1024),
    plain("nomic-embed-text-v1", 768),
    plain("nomic-embed-text-v1.5", 768),
    e5("multilingual-e5-small", 384),
    e5("multilingual-e5-base", 768),
    e5("multilingual-e5-large", 1024),
];

/// Look up a local model by exact name; `None` selects the default.
pub fn resolve_local_model(name: Option<&str>) -> Result<LocalModelSpec> {
    let name = name.unwrap_or(DEFAULT_LOCAL_MODEL);
    match LOCAL_MODELS.iter().find(|m| m.name == name) {
        Some(spec) => Ok(*spec),
        None => {
            let known: Vec<&str> = LOCAL_MODELS.iter().map(|m| m.name).collect();
            bail!(
                "Unknown local embedding model: '{}'. Supported models: {}",
                name,
                known.join(", ")
            )
        }
    }
}

/// A value loaded at most once, on first use.
pub struct LazyModel<T> {
    cell: OnceCell<T>,
    loads: AtomicUsize,
}

impl<T> Default for LazyModel<T> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }
}

impl<T> LazyModel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the loaded value, running `load` if nobody has yet.
    ///
    /// A failed load leaves the cell empty so a later call can try again.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<&T, EmbeddingError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EmbeddingError>>,
    {
        self.cell
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                load().await
            })
            .await
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// How many times a load has started.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "local-embeddings")]
pub use fastembed_backend::FastEmbedBackend;

#[cfg(feature = "local-embeddings")]
mod fastembed_backend {
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    use super::LazyModel;
    use crate::embedding::EmbeddingBackend;
    use crate::error::EmbeddingError;

    type SharedModel = Arc<Mutex<fastembed::TextEmbedding>>;

    pub struct FastEmbedBackend {
        model_name: String,
        model: LazyModel<SharedModel>,
    }

    impl FastEmbedBackend {
        pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
            to_fastembed_model(model_name)?;
            Ok(Self {
                model_name: model_name.to_string(),
                model: LazyModel::new(),
            })
        }

        async fn handle(&self) -> Result<SharedModel, EmbeddingError> {
            let name = self.model_name.clone();
            let model = self
                .model
                .get_or_load(|| async move {
                    tracing::info!(model = %name, "loading local embedding model");
                    let kind = to_fastembed_model(&name)?;
                    let loaded = tokio::task::spawn_blocking(move || {
                        fastembed::TextEmbedding::try_new(
                            fastembed::InitOptions::new(kind).with_show_download_progress(true),
                        )
                    })
                    .await
                    .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?
                    .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;
                    Ok(Arc::new(Mutex::new(loaded)))
                })
                .await?;
            Ok(Arc::clone(model))
        }
    }

    #[async_trait]
    impl EmbeddingBackend for FastEmbedBackend {
        fn name(&self) -> &str {
            "local"
        }

        async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let model = self.handle().await?;
            let texts = texts.to_vec();
            tokio::task::spawn_blocking(move || {
                let mut guard = model
                    .lock()
                    .map_err(|_| EmbeddingError::Fatal("local model lock poisoned".into()))?;
                guard
                    .embed(texts, None)
                    .map_err(|e| EmbeddingError::Fatal(format!("local embedding failed: {e}")))
            })
            .await
            .map_err(|e| EmbeddingError::Fatal(e.to_string()))?
        }
    }

    fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        use fastembed::EmbeddingModel::*;
        Ok(match name {
            "all-minilm-l6-v2" => AllMiniLML6V2,
            "bge-small-en-v1.5" => BGESmallENV15,
            "bge-base-en-v1.5" => BGEBaseENV15,
            "bge-large-en-v1.5" => BGELargeENV15,
            "nomic-embed-text-v1" => NomicEmbedTextV1,
            "nomic-embed-text-v1.5" => NomicEmbedTextV15,
            "multilingual-e5-small" => MultilingualE5Small,
            "multilingual-e5-base" => MultilingualE5Base,
            "multilingual-e5-large" => MultilingualE5Large,
            other => {
                return Err(EmbeddingError::ModelLoad(format!(
                    "unknown local embedding model: {other}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn default_and_e5_models_resolve() {
        let default = resolve_local_model(None).unwrap();
        assert_eq!(default.name, "all-minilm-l6-v2");
        assert_eq!(default.dims, 384);
        assert!(default.query_prefix.is_none());

        let e5 = resolve_local_model(Some("multilingual-e5-large")).unwrap();
        assert_eq!(e5.dims, 1024);
        assert_eq!(e5.query_prefix, Some("query: "));
        assert_eq!(e5.passage_prefix, Some("passage: "));
    }

    #[test]
    fn names_are_matched_exactly() {
        assert!(resolve_local_model(Some("my-e5-finetune")).is_err());
        assert!(resolve_local_model(Some("BGE-SMALL-EN-V1.5")).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_loads_once() {
        let lazy: Arc<LazyModel<String>> = Arc::new(LazyModel::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let lazy = Arc::clone(&lazy);
            handles.push(tokio::spawn(async move {
                let value = lazy
                    .get_or_load(|| async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("model".to_string())
                    })
                    .await
                    .unwrap();
                value.clone()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "model");
        }

        assert!(lazy.is_loaded());
        assert_eq!(lazy.load_count(), 1);
    }

    #[tokio::test]
    async fn failed_load_can_be_retried() {
        let lazy: LazyModel<u32> = LazyModel::new();
        let first = lazy
            .get_or_load(|| async { Err(EmbeddingError::ModelLoad("offline".into())) })
            .await;
        assert!(first.is_err());
        assert!(!lazy.is_loaded());

        let second = lazy.get_or_load(|| async { Ok(7) }).await.unwrap();
        assert_eq!(*second, 7);
        assert_eq!(lazy.load_count(), 2);
    }
}
