//! The service facade: every external operation in one place.
//!
//! [`RagService`] owns the database pool and the components built on it,
//! and exposes index, search, status, clear, progress, and the session
//! operations. The CLI, the HTTP server, and the tool registry all call
//! through here, so request validation and error mapping live in one spot.
//!
//! Failures come back as [`ServiceError`], which serializes as
//! `{"success": false, "error": {"code": ..., "message": ...}}`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::error::{EmbeddingError, IndexError, QueryError, StoreError};
use crate::indexer::{FileIndexOutcome, IndexReport, IndexingService};
use crate::loader::Loader;
use crate::migrate;
use crate::models::{QueryResult, Role, SessionMessage, SourceRef};
use crate::progress::{NoProgress, ProgressReport, ProgressReporter, ProgressTracker};
use crate::retrieval::{Retriever, SearchOptions};
use crate::session::{SessionHistory, SessionStore};
use crate::store::{SqliteStore, StoreStats, VectorStore};

// ============ Errors ============

/// A failed operation, as callers see it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: &'static str,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("invalid_input", message)
    }

    pub fn already_running() -> Self {
        Self::new("already_running", "an indexing pass is already running")
    }
}

impl Serialize for ServiceError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Body<'a> {
            code: &'a str,
            message: &'a str,
        }
        #[derive(Serialize)]
        struct Envelope<'a> {
            success: bool,
            error: Body<'a>,
        }
        Envelope {
            success: false,
            error: Body {
                code: self.code,
                message: &self.message,
            },
        }
        .serialize(s)
    }
}

impl From<EmbeddingError> for ServiceError {
    fn from(e: EmbeddingError) -> Self {
        let code = match &e {
            EmbeddingError::Disabled => "embeddings_disabled",
            EmbeddingError::RateLimited { .. } => "rate_limited",
            EmbeddingError::Exhausted { .. } => "embedding_exhausted",
            _ => "embedding_error",
        };
        Self::new(code, e.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        let code = match &e {
            StoreError::DimensionMismatch { .. } => "dimension_mismatch",
            _ => "store_error",
        };
        Self::new(code, e.to_string())
    }
}

impl From<QueryError> for ServiceError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Embedding(inner) => inner.into(),
            QueryError::Store(inner) => inner.into(),
            other => Self::invalid_input(other.to_string()),
        }
    }
}

impl From<IndexError> for ServiceError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::AlreadyRunning => Self::already_running(),
            IndexError::FileNotFound(_) => Self::new("not_found", e.to_string()),
            IndexError::Load(inner) => Self::invalid_input(inner.to_string()),
            IndexError::Embedding(inner) => inner.into(),
            IndexError::Store(inner) => inner.into(),
        }
    }
}

// ============ Requests and responses ============

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexRequest {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndexResponse {
    Full(IndexReport),
    File(FileIndexOutcome),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchFormat {
    Text,
    #[default]
    Json,
}

impl std::str::FromStr for SearchFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(SearchFormat::Text),
            "json" => Ok(SearchFormat::Json),
            other => Err(format!("unknown format '{}': expected text or json", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub format: SearchFormat,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchResponse {
    Json {
        results: Vec<QueryResult>,
        count: usize,
        relevant: Vec<QueryResult>,
        fallback: bool,
    },
    Text {
        format: SearchFormat,
        text: String,
        count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClearResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppendRequest {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub sources: Option<Vec<SourceRef>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetResponse {
    pub session_id: String,
    pub deleted: u64,
}

// ============ Service ============

pub struct RagService {
    config: Config,
    pool: SqlitePool,
    store: Arc<dyn VectorStore>,
    indexer: IndexingService,
    retriever: Retriever,
    sessions: SessionStore,
}

impl RagService {
    /// Connect, migrate, and wire up every component.
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_reporter(config, Box::new(NoProgress)).await
    }

    pub async fn open_with_reporter(
        config: Config,
        reporter: Box<dyn ProgressReporter>,
    ) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::migrate(&pool).await?;

        let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::new(pool.clone()));
        let embedder = Arc::new(Embedder::from_config(&config.embedding)?);
        let loader = Arc::new(Loader::new(&config.corpus)?);
        let tracker = Arc::new(ProgressTracker::with_reporter(reporter));

        let indexer = IndexingService::new(store.clone(), embedder.clone(), loader, tracker);
        let retriever = Retriever::new(store.clone(), embedder.clone(), config.retrieval.clone());
        let sessions = SessionStore::new(pool.clone());

        info!(
            db = %config.db.path.display(),
            provider = embedder.provider(),
            "service opened"
        );

        Ok(Self {
            config,
            pool,
            store,
            indexer,
            retriever,
            sessions,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- indexing ----

    pub async fn index(&self, req: IndexRequest) -> std::result::Result<IndexResponse, ServiceError> {
        match req.file {
            Some(path) => Ok(IndexResponse::File(
                self.indexer.index_file(&path, req.force).await?,
            )),
            None => Ok(IndexResponse::Full(self.indexer.index_all(req.force).await?)),
        }
    }

    /// Claim the tracker and run a full pass on a background task.
    pub fn start_background_index(&self, force: bool) -> std::result::Result<(), ServiceError> {
        let guard = self.indexer.begin()?;
        let indexer = self.indexer.clone();
        tokio::spawn(async move {
            if let Err(e) = indexer.run_full(guard, force).await {
                warn!(error = %e, "background indexing pass failed");
            }
        });
        Ok(())
    }

    pub fn progress(&self) -> ProgressReport {
        self.indexer.tracker().snapshot()
    }

    // ---- retrieval ----

    pub async fn search(&self, req: SearchRequest) -> std::result::Result<SearchResponse, ServiceError> {
        if req.query.trim().is_empty() {
            return Err(QueryError::EmptyQuery.into());
        }

        let session_id = match req.session_id.as_deref().map(str::trim) {
            Some("") => return Err(ServiceError::invalid_input("session_id must not be empty")),
            other => other,
        };

        let effective_query = match session_id {
            Some(id) => {
                let mut turns = self
                    .sessions
                    .recent_user_turns(id, self.config.session.context_turns)
                    .await?;
                turns.push(req.query.clone());
                turns.join("\n")
            }
            None => req.query.clone(),
        };

        let retrieval = self
            .retriever
            .search(
                &effective_query,
                SearchOptions {
                    limit: req.limit,
                    threshold: req.threshold,
                },
            )
            .await?;

        if let Some(id) = session_id {
            self.sessions
                .append(id, Role::User, &req.query, None)
                .await?;
        }

        let count = retrieval.unfiltered.len();
        Ok(match req.format {
            SearchFormat::Json => SearchResponse::Json {
                results: retrieval.unfiltered,
                count,
                relevant: retrieval.relevant,
                fallback: retrieval.fallback,
            },
            SearchFormat::Text => SearchResponse::Text {
                format: SearchFormat::Text,
                text: format_results_text(&retrieval.unfiltered),
                count,
            },
        })
    }

    // ---- store ----

    pub async fn status(&self) -> std::result::Result<StoreStats, ServiceError> {
        Ok(self.store.stats().await?)
    }

    /// Remove every document. Refused while a pass is running.
    pub async fn clear(&self) -> std::result::Result<ClearResponse, ServiceError> {
        // Holding the pass guard keeps an indexing pass from starting mid-clear
        let guard = self.indexer.begin()?;
        match self.store.clear_all().await {
            Ok(removed) => {
                guard.finish();
                info!(removed, "index cleared");
                Ok(ClearResponse { success: true })
            }
            Err(e) => {
                guard.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    // ---- sessions ----

    pub async fn session_append(
        &self,
        session_id: &str,
        req: AppendRequest,
    ) -> std::result::Result<SessionMessage, ServiceError> {
        validate_session_id(session_id)?;
        if req.content.trim().is_empty() {
            return Err(ServiceError::invalid_input("content must not be empty"));
        }
        Ok(self
            .sessions
            .append(session_id, req.role, &req.content, req.sources.as_deref())
            .await?)
    }

    pub async fn session_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> std::result::Result<SessionHistory, ServiceError> {
        validate_session_id(session_id)?;
        let limit = limit.unwrap_or(self.config.session.history_limit);
        if limit == 0 {
            return Err(QueryError::InvalidLimit.into());
        }
        Ok(self.sessions.history(session_id, limit).await?)
    }

    pub async fn session_reset(&self, session_id: &str) -> std::result::Result<ResetResponse, ServiceError> {
        validate_session_id(session_id)?;
        let deleted = self.sessions.reset(session_id).await?;
        Ok(ResetResponse {
            session_id: session_id.to_string(),
            deleted,
        })
    }
}

fn validate_session_id(session_id: &str) -> std::result::Result<(), ServiceError> {
    if session_id.trim().is_empty() {
        return Err(ServiceError::invalid_input("session_id must not be empty"));
    }
    Ok(())
}

/// Lines of content shown under each text-format result.
const EXCERPT_LINES: usize = 3;
const EXCERPT_WIDTH: usize = 120;

/// Render results as numbered, human-readable text.
pub fn format_results_text(results: &[QueryResult]) -> String {
    if results.is_empty() {
        return "No results.\n".to_string();
    }

    let mut out = String::new();
    for r in results {
        let language = r.language.as_deref().unwrap_or("unknown");
        out.push_str(&format!(
            "{}. [{:.4}] {} ({}, {}, {} lines)\n",
            r.rank, r.similarity, r.file_path, r.file_type, language, r.lines_count
        ));
        for line in r
            .content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take(EXCERPT_LINES)
        {
            let line = line.trim_end();
            let clipped: String = line.chars().take(EXCERPT_WIDTH).collect();
            out.push_str("   ");
            out.push_str(&clipped);
            if clipped.len() < line.len() {
                out.push_str("...");
            }
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
