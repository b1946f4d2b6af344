//! SQLite-backed [`VectorStore`].
//!
//! Embeddings live in the `documents.embedding` BLOB column (little-endian
//! f32). Search loads every vector and scores it in Rust; the deployment
//! dimension is recorded under `index_meta.dims`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;

use super::{clamp_similarity, rank_hits, StoreStats, VectorStore, UNKNOWN_LANGUAGE};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::StoreError;
use crate::models::{DocType, Document, LoadedFile, SearchHit};

/// SQLite caps bound parameters per statement; stay well below it.
const DELETE_CHUNK: usize = 500;

const DIMS_KEY: &str = "dims";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap a pool whose schema has already been migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn stored_dims(&self) -> Result<Option<usize>, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
                .bind(DIMS_KEY)
                .fetch_optional(&self.pool)
                .await?;
        match value {
            None => Ok(None),
            Some(v) => v.parse::<usize>().map(Some).map_err(|e| StoreError::Corrupt {
                path: "index_meta.dims".to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Record `dims` if nothing is recorded yet, then check it matches.
    async fn ensure_dims(&self, dims: usize) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES (?, ?)")
            .bind(DIMS_KEY)
            .bind(dims.to_string())
            .execute(&self.pool)
            .await?;

        match self.stored_dims().await? {
            Some(stored) if stored != dims => Err(StoreError::DimensionMismatch {
                stored,
                actual: dims,
            }),
            _ => Ok(()),
        }
    }
}

fn parse_doc_type(path: &str, raw: &str) -> Result<DocType, StoreError> {
    raw.parse().map_err(|reason| StoreError::Corrupt {
        path: path.to_string(),
        reason,
    })
}

fn row_to_document(row: &SqliteRow) -> Result<Document, StoreError> {
    let path: String = row.try_get("path")?;
    let doc_type: String = row.try_get("doc_type")?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    let indexed_ms: i64 = row.try_get("indexed_at")?;

    Ok(Document {
        doc_type: parse_doc_type(&path, &doc_type)?,
        content: row.try_get("content")?,
        embedding: blob_to_vec(&blob),
        content_hash: row.try_get("content_hash")?,
        language: row.try_get("language")?,
        line_count: row.try_get("line_count")?,
        indexed_at: DateTime::from_timestamp_millis(indexed_ms).unwrap_or_default(),
        path,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, file: &LoadedFile, embedding: &[f32]) -> Result<(), StoreError> {
        self.ensure_dims(embedding.len()).await?;

        sqlx::query(
            r#"
            INSERT INTO documents
                (path, doc_type, content, embedding, dims, content_hash, language, line_count, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                doc_type = excluded.doc_type,
                content = excluded.content,
                embedding = excluded.embedding,
                dims = excluded.dims,
                content_hash = excluded.content_hash,
                language = excluded.language,
                line_count = excluded.line_count,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&file.path)
        .bind(file.doc_type.as_str())
        .bind(&file.content)
        .bind(vec_to_blob(embedding))
        .bind(embedding.len() as i64)
        .bind(&file.content_hash)
        .bind(&file.language)
        .bind(file.line_count)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT path, doc_type, content, embedding, content_hash, language, line_count, indexed_at
            FROM documents WHERE path = ?
            "#,
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn hashes(&self) -> Result<HashMap<String, String>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT path, content_hash FROM documents")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn paths(&self) -> Result<Vec<String>, StoreError> {
        let paths = sqlx::query_scalar("SELECT path FROM documents ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        if let Some(stored) = self.stored_dims().await? {
            if stored != query.len() {
                return Err(StoreError::DimensionMismatch {
                    stored,
                    actual: query.len(),
                });
            }
        }

        let rows = sqlx::query(
            "SELECT path, doc_type, content, embedding, language, line_count FROM documents",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let path: String = row.try_get("path")?;
            let doc_type: String = row.try_get("doc_type")?;
            let blob: Vec<u8> = row.try_get("embedding")?;
            let similarity = clamp_similarity(cosine_similarity(query, &blob_to_vec(&blob)));
            hits.push(SearchHit {
                doc_type: parse_doc_type(&path, &doc_type)?,
                content: row.try_get("content")?,
                language: row.try_get("language")?,
                line_count: row.try_get("line_count")?,
                similarity,
                path,
            });
        }

        Ok(rank_hits(hits, limit))
    }

    async fn delete_by_paths(&self, paths: &[String]) -> Result<u64, StoreError> {
        if paths.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0;
        for chunk in paths.chunks(DELETE_CHUNK) {
            let mut builder: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("DELETE FROM documents WHERE path IN (");
            {
                let mut separated = builder.separated(", ");
                for path in chunk {
                    separated.push_bind(path);
                }
            }
            builder.push(")");
            deleted += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        Ok(deleted)
    }

    async fn clear_all(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM documents")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM index_meta WHERE key = ?")
            .bind(DIMS_KEY)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::empty();

        let by_type: Vec<(String, i64)> =
            sqlx::query_as("SELECT doc_type, COUNT(*) FROM documents GROUP BY doc_type")
                .fetch_all(&self.pool)
                .await?;
        for (doc_type, count) in by_type {
            stats.total += count as u64;
            stats.by_type.insert(doc_type, count as u64);
        }

        let by_language: Vec<(String, i64)> = sqlx::query_as(
            "SELECT COALESCE(language, ?) AS lang, COUNT(*) FROM documents GROUP BY lang",
        )
        .bind(UNKNOWN_LANGUAGE)
        .fetch_all(&self.pool)
        .await?;
        for (language, count) in by_language {
            stats.by_language.insert(language, count as u64);
        }

        Ok(stats)
    }
}
