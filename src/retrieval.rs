//! Query execution and the relevance filter.
//!
//! A query is embedded in query mode and matched against a candidate pool of
//! `max(P, K)` stored documents. From that pool:
//!
//! - **unfiltered**: the first `K` entries.
//! - **relevant**: every entry with `similarity >= threshold`.
//! - **fallback**: when nothing clears the threshold but the pool is not
//!   empty, `relevant` is exactly the top unfiltered entry with
//!   `fallback = true`.
//!
//! Both lists keep the pool's descending order; nothing is re-ranked or
//! re-queried.

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::QueryError;
use crate::models::{QueryResult, SearchHit};
use crate::store::VectorStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Retrieval {
    pub unfiltered: Vec<QueryResult>,
    pub relevant: Vec<QueryResult>,
    pub fallback: bool,
}

/// Per-request overrides of the configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub threshold: Option<f64>,
}

/// Split a ranked candidate pool into unfiltered and relevant sets.
pub fn apply_relevance_filter(pool: Vec<SearchHit>, top_k: usize, threshold: f64) -> Retrieval {
    let unfiltered: Vec<QueryResult> = pool
        .iter()
        .take(top_k)
        .enumerate()
        .map(|(i, hit)| QueryResult::from_hit(i + 1, hit.clone()))
        .collect();

    let relevant: Vec<QueryResult> = pool
        .into_iter()
        .filter(|hit| hit.similarity >= threshold)
        .enumerate()
        .map(|(i, hit)| QueryResult::from_hit(i + 1, hit))
        .collect();

    if relevant.is_empty() {
        if let Some(top) = unfiltered.first() {
            let mut best = top.clone();
            best.fallback = true;
            return Retrieval {
                unfiltered,
                relevant: vec![best],
                fallback: true,
            };
        }
    }

    Retrieval {
        unfiltered,
        relevant,
        fallback: false,
    }
}

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Retrieval, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let top_k = options.limit.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Err(QueryError::InvalidLimit);
        }
        let threshold = options.threshold.unwrap_or(self.config.threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(QueryError::InvalidThreshold(threshold));
        }

        let vector = self.embedder.embed_query(query).await?;
        let pool_size = self.config.candidate_pool.max(top_k);
        let pool = self.store.search(&vector, pool_size).await?;

        let retrieval = apply_relevance_filter(pool, top_k, threshold);
        debug!(
            top_k,
            threshold,
            unfiltered = retrieval.unfiltered.len(),
            relevant = retrieval.relevant.len(),
            fallback = retrieval.fallback,
            "query served"
        );
        Ok(retrieval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::retry::BackoffPolicy;
    use crate::embedding::{Capabilities, EmbeddingBackend};
    use crate::error::EmbeddingError;
    use crate::loader::hash_content;
    use crate::models::{DocType, LoadedFile};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use proptest::prelude::*;

    const SIMS: [f64; 5] = [0.91, 0.85, 0.50, 0.40, 0.20];

    fn hit(path: &str, similarity: f64) -> SearchHit {
        SearchHit {
            path: path.to_string(),
            doc_type: DocType::Docs,
            content: format!("content of {path}"),
            language: Some("markdown".into()),
            line_count: 1,
            similarity,
        }
    }

    fn scenario_pool() -> Vec<SearchHit> {
        SIMS.iter()
            .enumerate()
            .map(|(i, s)| hit(&format!("doc{i}.md"), *s))
            .collect()
    }

    #[test]
    fn threshold_keeps_entries_above_the_bar() {
        let r = apply_relevance_filter(scenario_pool(), 5, 0.70);
        let sims: Vec<f64> = r.unfiltered.iter().map(|q| q.similarity).collect();
        assert_eq!(sims, SIMS.to_vec());
        let ranks: Vec<usize> = r.unfiltered.iter().map(|q| q.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);

        assert_eq!(r.relevant.len(), 2);
        assert_eq!(r.relevant[0].similarity, 0.91);
        assert_eq!(r.relevant[1].similarity, 0.85);
        assert!(!r.fallback);
    }

    #[test]
    fn nothing_above_threshold_falls_back_to_top() {
        let r = apply_relevance_filter(scenario_pool(), 5, 0.95);
        assert!(r.fallback);
        assert_eq!(r.relevant.len(), 1);
        assert_eq!(r.relevant[0].similarity, 0.91);
        assert_eq!(r.relevant[0].file_path, "doc0.md");
        assert!(r.relevant[0].fallback);
        assert_eq!(r.unfiltered.len(), 5);
    }

    #[test]
    fn empty_pool_has_no_fallback() {
        let r = apply_relevance_filter(Vec::new(), 5, 0.7);
        assert!(r.unfiltered.is_empty());
        assert!(r.relevant.is_empty());
        assert!(!r.fallback);
    }

    /// Every query embeds to the x axis.
    struct AxisBackend;

    #[async_trait]
    impl EmbeddingBackend for AxisBackend {
        fn name(&self) -> &str {
            "axis"
        }

        async fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    async fn retriever(candidate_pool: usize) -> Retriever {
        let store = Arc::new(InMemoryStore::new());
        for (i, s) in SIMS.iter().enumerate() {
            let content = format!("doc {i}");
            let file = LoadedFile {
                path: format!("doc{i}.md"),
                doc_type: DocType::Docs,
                content_hash: hash_content(&content),
                content,
                language: Some("markdown".into()),
                line_count: 1,
            };
            let s = *s as f32;
            store.upsert(&file, &[s, (1.0 - s * s).sqrt()]).await.unwrap();
        }
        let embedder = Arc::new(Embedder::new(
            Arc::new(AxisBackend),
            Capabilities {
                model: "axis".into(),
                dims: 2,
                query_prefix: None,
                passage_prefix: None,
            },
            8,
            BackoffPolicy::default(),
        ));
        Retriever::new(
            store,
            embedder,
            RetrievalConfig {
                candidate_pool,
                top_k: 5,
                threshold: 0.70,
            },
        )
    }

    #[tokio::test]
    async fn end_to_end_scenarios() {
        let r = retriever(50).await;

        let result = r.search("anything", SearchOptions::default()).await.unwrap();
        assert_eq!(result.unfiltered.len(), 5);
        assert_eq!(result.relevant.len(), 2);
        assert_eq!(result.relevant[0].file_path, "doc0.md");

        let strict = r
            .search(
                "anything",
                SearchOptions {
                    threshold: Some(0.95),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(strict.fallback);
        assert_eq!(strict.relevant[0].file_path, "doc0.md");
    }

    #[tokio::test]
    async fn pool_grows_to_hold_k() {
        let r = retriever(2).await;
        let result = r
            .search(
                "q",
                SearchOptions {
                    limit: Some(4),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.unfiltered.len(), 4);
    }

    #[tokio::test]
    async fn invalid_queries_are_rejected() {
        let r = retriever(50).await;
        assert!(matches!(
            r.search("   ", SearchOptions::default()).await,
            Err(QueryError::EmptyQuery)
        ));
        assert!(matches!(
            r.search(
                "q",
                SearchOptions {
                    limit: Some(0),
                    ..Default::default()
                }
            )
            .await,
            Err(QueryError::InvalidLimit)
        ));
        assert!(matches!(
            r.search(
                "q",
                SearchOptions {
                    threshold: Some(1.5),
                    ..Default::default()
                }
            )
            .await,
            Err(QueryError::InvalidThreshold(_))
        ));
    }

    proptest! {
        #[test]
        fn filter_properties(
            mut sims in proptest::collection::vec(0.0f64..=1.0, 0..30),
            top_k in 1usize..10,
            threshold in 0.0f64..=1.0,
        ) {
            sims.sort_by(|a, b| b.partial_cmp(a).unwrap());
            let pool: Vec<SearchHit> = sims
                .iter()
                .enumerate()
                .map(|(i, s)| hit(&format!("f{i:02}"), *s))
                .collect();

            let r = apply_relevance_filter(pool, top_k, threshold);

            prop_assert_eq!(r.unfiltered.len(), top_k.min(sims.len()));
            for pair in r.unfiltered.windows(2) {
                prop_assert!(pair[0].similarity >= pair[1].similarity);
            }

            let above = sims.iter().filter(|s| **s >= threshold).count();
            if above > 0 {
                prop_assert!(!r.fallback);
                prop_assert_eq!(r.relevant.len(), above);
                prop_assert!(r.relevant.iter().all(|q| q.similarity >= threshold));
                for pair in r.relevant.windows(2) {
                    prop_assert!(pair[0].similarity >= pair[1].similarity);
                }
            } else if sims.is_empty() {
                prop_assert!(r.relevant.is_empty());
            } else {
                prop_assert!(r.fallback);
                prop_assert_eq!(r.relevant.len(), 1);
                prop_assert_eq!(&r.relevant[0].file_path, &r.unfiltered[0].file_path);
            }
        }
    }
}
