//! The `requests` table: the opaque application row the core reads but
//! never writes. Columns are grouped by semantic role; all are nullable
//! because missing values are absent, not empty strings.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub request_id: String,

    // --- descriptive text ---
    pub project_name: Option<String>,
    pub description: Option<String>,
    pub area_description: Option<String>,
    pub remarks: Option<String>,

    // --- actors ---
    pub updated_by: Option<String>,
    pub created_by: Option<String>,
    pub responsible_employee: Option<String>,
    pub contact_first_name: Option<String>,
    pub contact_last_name: Option<String>,
    pub yazam_contact_name: Option<String>,

    // --- classifiers (small-cardinality codes) ---
    pub type_id: Option<i32>,
    pub status_id: Option<i32>,
    pub source_id: Option<i32>,
    pub reason_id: Option<i32>,

    // --- temporal ---
    /// Stored as text in the source corpus. ISO format and global
    /// comparability are assumed, not verified at read time.
    pub status_date: Option<String>,
    pub created_date: Option<String>,
    pub updated_date: Option<String>,

    // --- booleans and coordinates ---
    pub is_archived: Option<bool>,
    pub is_external: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::chunk::Entity")]
    Chunk,
}

impl Related<super::chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chunk.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
