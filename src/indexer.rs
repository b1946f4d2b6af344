//! The indexing pipeline.
//!
//! A full pass runs `loading → filtering → embedding → storing → cleanup`:
//!
//! 1. Scan the corpus with the [`Loader`].
//! 2. Diff the accepted files against stored hashes ([`changes::plan`]).
//! 3. Embed new and changed files, one batch at a time.
//! 4. Upsert every embedded file.
//! 5. Delete stored paths that the scan no longer produced.
//!
//! Any embedding or store failure aborts the pass where it happened: the
//! tracker enters `error`, rows already upserted stay, and the removal step
//! is skipped. The next pass reconciles through the same hash comparison.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::changes;
use crate::embedding::{EmbedMode, Embedder};
use crate::error::IndexError;
use crate::loader::Loader;
use crate::models::{DocType, LoadedFile};
use crate::progress::{JobPhase, PassGuard, ProgressTracker};
use crate::store::VectorStore;

/// Outcome of a full pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub indexed_count: usize,
    pub skipped_count: usize,
    pub removed_count: u64,
    pub total_in_store: u64,
    pub by_type: BTreeMap<String, u64>,
}

/// Outcome of a single-file pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileIndexOutcome {
    Indexed {
        path: String,
        doc_type: DocType,
        language: Option<String>,
        line_count: i64,
    },
    Unchanged {
        path: String,
        message: String,
    },
}

#[derive(Clone)]
pub struct IndexingService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    loader: Arc<Loader>,
    tracker: Arc<ProgressTracker>,
}

impl IndexingService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        loader: Arc<Loader>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            store,
            embedder,
            loader,
            tracker,
        }
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Claim the tracker for a pass without running it yet.
    pub fn begin(&self) -> Result<PassGuard, IndexError> {
        self.tracker.try_start()
    }

    /// Run a full pass, rejecting it if another one is active.
    pub async fn index_all(&self, force: bool) -> Result<IndexReport, IndexError> {
        let guard = self.begin()?;
        self.run_full(guard, force).await
    }

    /// Run a full pass under an already-claimed guard.
    pub async fn run_full(&self, guard: PassGuard, force: bool) -> Result<IndexReport, IndexError> {
        match self.full_pass(&guard, force).await {
            Ok(report) => {
                guard.finish();
                info!(
                    indexed = report.indexed_count,
                    skipped = report.skipped_count,
                    removed = report.removed_count,
                    total = report.total_in_store,
                    "indexing pass complete"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "indexing pass failed");
                guard.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn full_pass(&self, guard: &PassGuard, force: bool) -> Result<IndexReport, IndexError> {
        let outcome = self.loader.scan()?;
        let accepted = outcome.files.len() as u64;
        debug!(
            accepted,
            skipped = outcome.skipped.len(),
            "corpus loaded"
        );

        guard.enter(JobPhase::Filtering, accepted);
        let stored = self.store.hashes().await?;
        let plan = changes::plan(outcome.files, &stored, force);
        guard.step_by(accepted, None);

        guard.enter(JobPhase::Embedding, plan.to_embed.len() as u64);
        let vectors = self.embed_files(guard, &plan.to_embed).await?;

        guard.enter(JobPhase::Storing, plan.to_embed.len() as u64);
        for (file, vector) in plan.to_embed.iter().zip(vectors.iter()) {
            self.store.upsert(file, vector).await?;
            guard.step(&file.path);
        }

        guard.enter(JobPhase::Cleanup, plan.removed.len() as u64);
        let removed_count = self.store.delete_by_paths(&plan.removed).await?;
        if removed_count > 0 {
            info!(removed = removed_count, "removed stale documents");
        }
        guard.step_by(plan.removed.len() as u64, plan.removed.last().map(String::as_str));

        let stats = self.store.stats().await?;
        Ok(IndexReport {
            indexed_count: plan.to_embed.len(),
            skipped_count: plan.unchanged,
            removed_count,
            total_in_store: stats.total,
            by_type: stats.by_type,
        })
    }

    /// Embed sequentially in configured batches, reporting each batch.
    async fn embed_files(
        &self,
        guard: &PassGuard,
        files: &[LoadedFile],
    ) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut vectors = Vec::with_capacity(files.len());
        for batch in files.chunks(self.embedder.batch_size()) {
            let texts: Vec<String> = batch.iter().map(|f| f.content.clone()).collect();
            vectors.extend(self.embedder.embed_batch(&texts, EmbedMode::Document).await?);
            guard.step_by(
                batch.len() as u64,
                batch.last().map(|f| f.path.as_str()),
            );
        }
        Ok(vectors)
    }

    /// Index one file by path. Follows the same hash rule as a full pass but
    /// never removes anything.
    pub async fn index_file(&self, path: &Path, force: bool) -> Result<FileIndexOutcome, IndexError> {
        let guard = self.begin()?;
        match self.single_pass(&guard, path, force).await {
            Ok(outcome) => {
                guard.finish();
                Ok(outcome)
            }
            Err(e) => {
                guard.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn single_pass(
        &self,
        guard: &PassGuard,
        path: &Path,
        force: bool,
    ) -> Result<FileIndexOutcome, IndexError> {
        let file = self.loader.load_path(path)?;

        guard.enter(JobPhase::Filtering, 1);
        let stored_hash = self
            .store
            .get(&file.path)
            .await?
            .map(|doc| doc.content_hash);
        let unchanged = !force && stored_hash.as_deref() == Some(file.content_hash.as_str());
        guard.step(&file.path);

        if unchanged {
            guard.enter(JobPhase::Embedding, 0);
            guard.enter(JobPhase::Storing, 0);
            guard.enter(JobPhase::Cleanup, 0);
            return Ok(FileIndexOutcome::Unchanged {
                message: format!("{} is unchanged", file.path),
                path: file.path,
            });
        }

        guard.enter(JobPhase::Embedding, 1);
        let vectors = self.embed_files(guard, std::slice::from_ref(&file)).await?;

        guard.enter(JobPhase::Storing, 1);
        if let Some(vector) = vectors.first() {
            self.store.upsert(&file, vector).await?;
        }
        guard.step(&file.path);

        guard.enter(JobPhase::Cleanup, 0);
        info!(path = %file.path, "indexed single file");

        Ok(FileIndexOutcome::Indexed {
            path: file.path,
            doc_type: file.doc_type,
            language: file.language,
            line_count: file.line_count,
        })
    }
}
