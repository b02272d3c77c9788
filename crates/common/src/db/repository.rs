//! Repository: the low-level surface the hybrid retriever builds its
//! queries on top of. Keeps the handful of operations that do not depend
//! on a parsed query shape — chunk lookups, the embedding-dimension
//! self-check — while the AND-composed predicate building for `/search`
//! and `/rag` lives in the retrieval crate, which talks to `DbPool`
//! directly the same way this repository does.

use super::{models, DbPool};
use crate::errors::{AppError, Result};
use sea_orm::{DbBackend, FromQueryResult, Statement};
use serde::{Deserialize, Serialize};

/// A trimmed projection of a request row plus the scoring fields the
/// retriever attaches during ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestView {
    pub request_id: String,
    #[serde(flatten)]
    pub fields: std::collections::HashMap<String, serde_json::Value>,
    pub similarity: f32,
    pub boost: f32,
}

pub struct Repository {
    db: DbPool,
}

impl Repository {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    /// Format an embedding vector as a pgvector literal: `[0.1,0.2,0.3]`.
    pub fn format_vector_literal(embedding: &[f32]) -> String {
        format!(
            "[{}]",
            embedding
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(",")
        )
    }

    /// Fetch one chunk embedding belonging to `request_id`, used by the
    /// similar-by-id path to obtain a query vector without calling the
    /// embedding client.
    pub async fn fetch_one_chunk_embedding(&self, request_id: &str) -> Result<Option<Vec<f32>>> {
        #[derive(Debug, FromQueryResult)]
        struct Row {
            embedding: Option<String>,
        }

        let sql = r#"
            SELECT embedding
            FROM request_embeddings
            WHERE request_id = $1 AND embedding IS NOT NULL
            ORDER BY chunk_index ASC
            LIMIT 1
        "#;

        let row = Row::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            vec![request_id.into()],
        ))
        .one(self.db.connection())
        .await
        .map_err(|e| AppError::BackendError {
            kind: crate::errors::SqlKind::Lookup,
            message: e.to_string(),
        })?;

        Ok(row.and_then(|r| r.embedding).and_then(|text| models::parse_embedding_text(&text)))
    }

    /// Whether `request_id` exists at all in the corpus, used to
    /// distinguish "source request not found" from "source request has no
    /// embedded chunks yet".
    pub async fn request_exists(&self, request_id: &str) -> Result<bool> {
        use sea_orm::EntityTrait;
        let found = models::RequestEntity::find_by_id(request_id.to_string())
            .one(self.db.connection())
            .await
            .map_err(|e| AppError::BackendError {
                kind: crate::errors::SqlKind::Lookup,
                message: e.to_string(),
            })?;
        Ok(found.is_some())
    }

    /// Best-effort startup self-check: read one embedded chunk's vector
    /// and report its dimension, so the service can warn on a dimension
    /// mismatch against configuration without failing startup over an
    /// empty corpus.
    pub async fn sample_embedding_dimension(&self) -> Result<Option<usize>> {
        #[derive(Debug, FromQueryResult)]
        struct Row {
            embedding: Option<String>,
        }

        let sql = "SELECT embedding FROM request_embeddings WHERE embedding IS NOT NULL LIMIT 1";
        let row = Row::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            vec![],
        ))
        .one(self.db.connection())
        .await
        .map_err(|e| AppError::BackendError {
            kind: crate::errors::SqlKind::Lookup,
            message: e.to_string(),
        })?;

        Ok(row.and_then(|r| r.embedding).map(|text| {
            text.trim_start_matches('[')
                .trim_end_matches(']')
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .count()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_format() {
        let embedding = vec![0.1, 0.2, 0.3];
        assert_eq!(Repository::format_vector_literal(&embedding), "[0.1,0.2,0.3]");
    }
}
