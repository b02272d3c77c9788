//! The `request_embeddings` table: one or more text chunks per request,
//! numbered densely from 0, each carrying its own embedding vector.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "request_embeddings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub request_id: String,

    pub chunk_index: i32,

    /// Deterministic serialisation of the request's fields with weighted
    /// repetition, labelled with stable field names so the same request
    /// always produces the same chunk text across re-embedding runs.
    #[sea_orm(column_type = "Text")]
    pub text_chunk: String,

    /// pgvector embedding stored as text for SeaORM compatibility; vector
    /// operations go through raw SQL against the `vector` column cast (see
    /// `Repository`). Null only for rows the embedding pipeline has not
    /// finished writing yet — such rows are invisible to the retriever.
    #[sea_orm(column_type = "Text", nullable)]
    pub embedding: Option<String>,

    pub metadata: Option<Json>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::request::Entity",
        from = "Column::RequestId",
        to = "super::request::Column::RequestId",
        on_delete = "Cascade"
    )]
    Request,
}

impl Related<super::request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Request.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parse the stored `"[1.0,2.0,...]"` text format back into a vector.
    pub fn parse_embedding(&self) -> Option<Vec<f32>> {
        self.embedding.as_deref().and_then(parse_embedding_text)
    }
}

/// Parse the pgvector text format (`"[1.0,2.0,...]"`) shared by the entity
/// model and any raw-SQL row carrying the same column.
pub fn parse_embedding_text(text: &str) -> Option<Vec<f32>> {
    let inner = text.trim_start_matches('[').trim_end_matches(']');
    inner.split(',').map(|v| v.trim().parse::<f32>().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding_round_trip() {
        let model = Model {
            id: Uuid::nil(),
            request_id: "1".into(),
            chunk_index: 0,
            text_chunk: String::new(),
            embedding: Some("[0.1,0.2,0.3]".to_string()),
            metadata: None,
            created_at: chrono::Utc::now().into(),
        };
        assert_eq!(model.parse_embedding(), Some(vec![0.1, 0.2, 0.3]));
    }

    #[test]
    fn test_parse_embedding_none_when_null() {
        let model = Model {
            id: Uuid::nil(),
            request_id: "1".into(),
            chunk_index: 0,
            text_chunk: String::new(),
            embedding: None,
            metadata: None,
            created_at: chrono::Utc::now().into(),
        };
        assert_eq!(model.parse_embedding(), None);
    }
}
