//! Append-only per-session message log.
//!
//! Messages are ordered by their autoincrement id, which follows insertion
//! order, so history within a session is total even when two messages share
//! a millisecond timestamp. Sessions never see each other's messages.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{Role, SessionMessage, SourceRef};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionHistory {
    pub session_id: String,
    /// The last `limit` messages, oldest first.
    pub messages: Vec<SessionMessage>,
    /// All messages stored for the session.
    pub total: u64,
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

type MessageRow = (i64, String, String, String, Option<String>, i64);

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message and return it as stored.
    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        sources: Option<&[SourceRef]>,
    ) -> Result<SessionMessage, StoreError> {
        let sources_json = sources
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                path: format!("session {session_id}"),
                reason: e.to_string(),
            })?;
        let now = Utc::now();

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO session_messages (session_id, role, content, sources_json, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(&sources_json)
        .bind(now.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(SessionMessage {
            id: row.0,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            sources: sources.map(<[SourceRef]>::to_vec),
            created_at: DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now),
        })
    }

    /// The last `limit` messages in chronological order, plus the total count.
    pub async fn history(&self, session_id: &str, limit: usize) -> Result<SessionHistory, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, session_id, role, content, sources_json, created_at FROM (\
                SELECT id, session_id, role, content, sources_json, created_at \
                FROM session_messages WHERE session_id = ? \
                ORDER BY id DESC LIMIT ?\
             ) ORDER BY id ASC",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM session_messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;

        let messages = rows
            .into_iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SessionHistory {
            session_id: session_id.to_string(),
            messages,
            total: total as u64,
        })
    }

    /// Content of the last `n` user messages, oldest first.
    pub async fn recent_user_turns(&self, session_id: &str, n: usize) -> Result<Vec<String>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut turns: Vec<String> = sqlx::query_scalar(
            "SELECT content FROM session_messages \
             WHERE session_id = ? AND role = 'user' \
             ORDER BY id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        turns.reverse();
        Ok(turns)
    }

    /// Delete every message for the session; returns how many were removed.
    pub async fn reset(&self, session_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM session_messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_message(row: MessageRow) -> Result<SessionMessage, StoreError> {
    let (id, session_id, role, content, sources_json, created_ms) = row;
    let corrupt = |reason: String| StoreError::Corrupt {
        path: format!("session {session_id} message {id}"),
        reason,
    };

    let role: Role = role.parse().map_err(corrupt)?;
    let sources = match sources_json {
        Some(json) => Some(
            serde_json::from_str::<Vec<SourceRef>>(&json).map_err(|e| corrupt(e.to_string()))?,
        ),
        None => None,
    };

    Ok(SessionMessage {
        id,
        role,
        content,
        sources,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        session_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SessionStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("rag.sqlite")).await.unwrap();
        migrate::migrate(&pool).await.unwrap();
        (tmp, SessionStore::new(pool))
    }

    #[tokio::test]
    async fn history_is_chronological_and_limited() {
        let (_tmp, sessions) = store().await;
        for i in 0..5 {
            sessions
                .append("s1", Role::User, &format!("question {i}"), None)
                .await
                .unwrap();
        }
        let sources = vec![SourceRef {
            path: "src/lib.rs".into(),
            similarity: 0.82,
        }];
        sessions
            .append("s1", Role::Assistant, "answer", Some(&sources))
            .await
            .unwrap();

        let history = sessions.history("s1", 3).await.unwrap();
        assert_eq!(history.total, 6);
        let contents: Vec<&str> = history.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question 3", "question 4", "answer"]);
        assert_eq!(history.messages[2].role, Role::Assistant);
        assert_eq!(history.messages[2].sources.as_deref(), Some(sources.as_slice()));
        assert!(history.messages[0].sources.is_none());
    }

    #[tokio::test]
    async fn sessions_are_isolated_and_resettable() {
        let (_tmp, sessions) = store().await;
        sessions.append("a", Role::User, "one", None).await.unwrap();
        sessions.append("a", Role::User, "two", None).await.unwrap();
        sessions.append("b", Role::User, "other", None).await.unwrap();

        let b = sessions.history("b", 10).await.unwrap();
        assert_eq!(b.total, 1);
        assert_eq!(b.messages[0].content, "other");

        assert_eq!(sessions.reset("a").await.unwrap(), 2);
        assert_eq!(sessions.history("a", 10).await.unwrap().total, 0);
        assert_eq!(sessions.history("b", 10).await.unwrap().total, 1);
        assert_eq!(sessions.reset("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recent_user_turns_skip_assistant() {
        let (_tmp, sessions) = store().await;
        sessions.append("s", Role::User, "first", None).await.unwrap();
        sessions.append("s", Role::Assistant, "reply", None).await.unwrap();
        sessions.append("s", Role::User, "second", None).await.unwrap();
        sessions.append("s", Role::User, "third", None).await.unwrap();

        let turns = sessions.recent_user_turns("s", 2).await.unwrap();
        assert_eq!(turns, vec!["second".to_string(), "third".to_string()]);
        assert!(sessions.recent_user_turns("s", 0).await.unwrap().is_empty());
    }
}
