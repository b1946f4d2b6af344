//! Error taxonomy for the indexing and retrieval pipeline.
//!
//! | Error | Scope | Handling |
//! |-------|-------|----------|
//! | [`LoadError`] | one file | logged and skipped, never aborts a pass |
//! | [`EmbeddingError`] | one batch | retried when [`EmbeddingError::is_retryable`], else fatal for the pass |
//! | [`StoreError`] | persistence | fatal for the pass |
//! | [`QueryError`] | one request | returned to the caller |
//! | [`IndexError`] | one pass | surfaced to the caller |

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("corpus root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("{path}: {size} bytes exceeds the {limit} byte ceiling")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("{path}: empty or whitespace-only")]
    Empty { path: String },

    #[error("{path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}: not matched by any code or docs pattern")]
    NotMatched(String),

    #[error("{0}: outside the corpus root")]
    OutsideRoot(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-requested wait, from a `Retry-After` header.
        retry_after: Option<std::time::Duration>,
    },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("embedding request failed: {0}")]
    Fatal(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<EmbeddingError>,
    },

    #[error("embedding provider is disabled")]
    Disabled,

    #[error("expected {expected} vectors, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("expected {expected}-dimensional vectors, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("model loading failed: {0}")]
    ModelLoad(String),
}

impl EmbeddingError {
    /// Rate-limit and transient failures are worth another attempt; everything
    /// else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::RateLimited { .. } | EmbeddingError::Transient(_)
        )
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            EmbeddingError::Transient(e.to_string())
        } else {
            EmbeddingError::Fatal(e.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(
        "store holds {stored}-dimensional embeddings but got {actual}; clear the index after changing models"
    )]
    DimensionMismatch { stored: usize, actual: usize },

    #[error("corrupt row for {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("limit must be >= 1")]
    InvalidLimit,

    #[error("threshold must be in [0.0, 1.0], got {0}")]
    InvalidThreshold(f64),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("an indexing pass is already running")]
    AlreadyRunning,

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited(message: &str) -> EmbeddingError {
        EmbeddingError::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    #[test]
    fn retryable_classification() {
        assert!(rate_limited("429").is_retryable());
        assert!(EmbeddingError::Transient("503".into()).is_retryable());
        assert!(!EmbeddingError::Fatal("400".into()).is_retryable());
        assert!(!EmbeddingError::Disabled.is_retryable());
        let exhausted = EmbeddingError::Exhausted {
            attempts: 3,
            last: Box::new(rate_limited("429")),
        };
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn exhausted_message_names_last_error() {
        let e = EmbeddingError::Exhausted {
            attempts: 3,
            last: Box::new(rate_limited("slow down")),
        };
        assert_eq!(
            e.to_string(),
            "gave up after 3 attempts: rate limited: slow down"
        );
    }
}
