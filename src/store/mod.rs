//! Vector store abstraction.
//!
//! A [`VectorStore`] persists one [`Document`] row per path and answers
//! brute-force cosine queries over them. Two implementations:
//!
//! - [`sqlite::SqliteStore`]: the persistent store used by the service.
//! - [`memory::InMemoryStore`]: `RwLock`-guarded maps for tests.
//!
//! Every store fixes its embedding dimension on the first upsert; a vector of
//! any other length is rejected with [`StoreError::DimensionMismatch`] until
//! the store is cleared.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::StoreError;
use crate::models::{Document, LoadedFile, SearchHit};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Aggregate counts over the stored documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    /// Always carries both `code` and `docs`, zero when absent.
    pub by_type: BTreeMap<String, u64>,
    /// Untagged documents are counted under `"unknown"`.
    pub by_language: BTreeMap<String, u64>,
}

impl StoreStats {
    pub fn empty() -> Self {
        let mut by_type = BTreeMap::new();
        by_type.insert("code".to_string(), 0);
        by_type.insert("docs".to_string(), 0);
        Self {
            total: 0,
            by_type,
            by_language: BTreeMap::new(),
        }
    }
}

pub const UNKNOWN_LANGUAGE: &str = "unknown";

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or fully overwrite the row for `file.path`, stamping `indexed_at`.
    async fn upsert(&self, file: &LoadedFile, embedding: &[f32]) -> Result<(), StoreError>;

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    /// `path → content_hash` for every stored row.
    async fn hashes(&self) -> Result<HashMap<String, String>, StoreError>;

    /// All stored paths, sorted.
    async fn paths(&self) -> Result<Vec<String>, StoreError>;

    /// Up to `limit` rows by descending similarity, ties broken by path.
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, StoreError>;

    /// Delete the named rows; returns how many existed.
    async fn delete_by_paths(&self, paths: &[String]) -> Result<u64, StoreError>;

    /// Delete every row and forget the recorded dimension.
    async fn clear_all(&self) -> Result<u64, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Map a raw cosine value onto `[0, 1]`.
pub fn clamp_similarity(cosine: f32) -> f64 {
    f64::from(cosine).clamp(0.0, 1.0)
}

/// Order hits by descending similarity, then ascending path, and keep `limit`.
pub fn rank_hits(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocType;
    use proptest::prelude::*;

    fn hit(path: &str, similarity: f64) -> SearchHit {
        SearchHit {
            path: path.to_string(),
            doc_type: DocType::Code,
            content: String::new(),
            language: None,
            line_count: 0,
            similarity,
        }
    }

    #[test]
    fn ties_break_by_path() {
        let ranked = rank_hits(vec![hit("b", 0.5), hit("a", 0.5), hit("c", 0.9)], 10);
        let paths: Vec<&str> = ranked.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["c", "a", "b"]);
    }

    #[test]
    fn clamps_negative_cosine() {
        assert_eq!(clamp_similarity(-0.4), 0.0);
        assert_eq!(clamp_similarity(1.0000001), 1.0);
    }

    proptest! {
        #[test]
        fn ranked_is_sorted_and_bounded(
            sims in proptest::collection::vec(0.0f64..=1.0, 0..40),
            limit in 0usize..50,
        ) {
            let hits: Vec<SearchHit> = sims
                .iter()
                .enumerate()
                .map(|(i, s)| hit(&format!("f{i:03}"), *s))
                .collect();
            let ranked = rank_hits(hits, limit);
            prop_assert!(ranked.len() <= limit);
            prop_assert!(ranked.len() == limit.min(sims.len()));
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].similarity >= pair[1].similarity);
            }
        }
    }
}
