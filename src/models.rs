//! Core data models used throughout the index.
//!
//! These types represent the files, stored documents, query results, and
//! session messages that flow through the indexing and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Corpus category a file was matched under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Code,
    Docs,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Code => "code",
            DocType::Docs => "docs",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(DocType::Code),
            "docs" => Ok(DocType::Docs),
            other => Err(format!("unknown document type: {}", other)),
        }
    }
}

/// A file accepted by the loader, ready for change detection and embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFile {
    /// Path relative to the corpus root, `/`-separated. Unique key.
    pub path: String,
    pub doc_type: DocType,
    pub content: String,
    pub content_hash: String,
    pub language: Option<String>,
    pub line_count: i64,
}

/// A row in the vector store.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: String,
    pub doc_type: DocType,
    pub content: String,
    pub embedding: Vec<f32>,
    pub content_hash: String,
    pub language: Option<String>,
    pub line_count: i64,
    pub indexed_at: DateTime<Utc>,
}

/// A vector search hit before rank assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub path: String,
    pub doc_type: DocType,
    pub content: String,
    pub language: Option<String>,
    pub line_count: i64,
    /// `1 - cosine_distance`, clamped to `[0, 1]`.
    pub similarity: f64,
}

/// A ranked result handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub rank: usize,
    pub file_path: String,
    pub file_type: DocType,
    pub language: Option<String>,
    #[serde(serialize_with = "round_similarity")]
    pub similarity: f64,
    pub lines_count: i64,
    pub content: String,
    /// True only for the single synthetic result returned when nothing
    /// clears the relevance threshold.
    pub fallback: bool,
}

impl QueryResult {
    pub fn from_hit(rank: usize, hit: SearchHit) -> Self {
        Self {
            rank,
            file_path: hit.path,
            file_type: hit.doc_type,
            language: hit.language,
            similarity: hit.similarity,
            lines_count: hit.line_count,
            content: hit.content,
            fallback: false,
        }
    }
}

fn round_similarity<S: serde::Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((value * 10_000.0).round() / 10_000.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// A retrieval source cited by a session message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub path: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRef>>,
    pub created_at: DateTime<Utc>,
}
