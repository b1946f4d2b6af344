//! In-memory [`VectorStore`] for tests.
//!
//! A `BTreeMap` keyed by path behind `std::sync::RwLock`; search is the same
//! brute-force cosine scan the SQLite store runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{clamp_similarity, rank_hits, StoreStats, VectorStore, UNKNOWN_LANGUAGE};
use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{Document, LoadedFile, SearchHit};

#[derive(Default)]
struct State {
    docs: BTreeMap<String, Document>,
    dims: Option<usize>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a single map operation, so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, file: &LoadedFile, embedding: &[f32]) -> Result<(), StoreError> {
        let mut state = self.write();
        match state.dims {
            Some(stored) if stored != embedding.len() => {
                return Err(StoreError::DimensionMismatch {
                    stored,
                    actual: embedding.len(),
                })
            }
            _ => state.dims = Some(embedding.len()),
        }

        state.docs.insert(
            file.path.clone(),
            Document {
                path: file.path.clone(),
                doc_type: file.doc_type,
                content: file.content.clone(),
                embedding: embedding.to_vec(),
                content_hash: file.content_hash.clone(),
                language: file.language.clone(),
                line_count: file.line_count,
                indexed_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.read().docs.get(path).cloned())
    }

    async fn hashes(&self) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .read()
            .docs
            .values()
            .map(|d| (d.path.clone(), d.content_hash.clone()))
            .collect())
    }

    async fn paths(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read().docs.keys().cloned().collect())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        let state = self.read();
        if let Some(stored) = state.dims {
            if stored != query.len() {
                return Err(StoreError::DimensionMismatch {
                    stored,
                    actual: query.len(),
                });
            }
        }

        let hits = state
            .docs
            .values()
            .map(|d| SearchHit {
                path: d.path.clone(),
                doc_type: d.doc_type,
                content: d.content.clone(),
                language: d.language.clone(),
                line_count: d.line_count,
                similarity: clamp_similarity(cosine_similarity(query, &d.embedding)),
            })
            .collect();
        Ok(rank_hits(hits, limit))
    }

    async fn delete_by_paths(&self, paths: &[String]) -> Result<u64, StoreError> {
        let mut state = self.write();
        let removed = paths
            .iter()
            .filter(|p| state.docs.remove(p.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        let mut state = self.write();
        let count = state.docs.len() as u64;
        state.docs.clear();
        state.dims = None;
        Ok(count)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.read();
        let mut stats = StoreStats::empty();
        for doc in state.docs.values() {
            stats.total += 1;
            *stats
                .by_type
                .entry(doc.doc_type.as_str().to_string())
                .or_insert(0) += 1;
            let lang = doc.language.as_deref().unwrap_or(UNKNOWN_LANGUAGE);
            *stats.by_language.entry(lang.to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::hash_content;
    use crate::models::DocType;

    fn file(path: &str, content: &str) -> LoadedFile {
        LoadedFile {
            path: path.to_string(),
            doc_type: DocType::Docs,
            content: content.to_string(),
            content_hash: hash_content(content),
            language: Some("markdown".into()),
            line_count: 1,
        }
    }

    #[tokio::test]
    async fn behaves_like_a_keyed_table() {
        let store = InMemoryStore::new();
        store.upsert(&file("b.md", "one"), &[0.0, 1.0]).await.unwrap();
        store.upsert(&file("a.md", "two"), &[1.0, 0.0]).await.unwrap();
        store.upsert(&file("a.md", "three"), &[1.0, 0.0]).await.unwrap();

        assert_eq!(store.paths().await.unwrap(), vec!["a.md", "b.md"]);
        assert_eq!(store.get("a.md").await.unwrap().unwrap().content, "three");

        let hits = store.search(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.md");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_type["docs"], 2);
        assert_eq!(stats.by_type["code"], 0);
        assert_eq!(stats.by_language["markdown"], 2);

        assert_eq!(store.delete_by_paths(&["a.md".into()]).await.unwrap(), 1);
        assert!(store.upsert(&file("c.md", "x"), &[1.0]).await.is_err());
        assert_eq!(store.clear_all().await.unwrap(), 1);
        store.upsert(&file("c.md", "x"), &[1.0]).await.unwrap();
    }
}
