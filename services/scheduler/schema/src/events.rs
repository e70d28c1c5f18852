use sea_orm::entity::prelude::*;

/// Scheduled callback, unique on `(slug, key)`. Failed events stay in this
/// table with `failed = true`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub slug: String,
    pub key: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub request: Json,
    pub run_at: chrono::DateTime<chrono::Utc>,
    /// Recurrence units, `NULL` for one-shot events.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub recurring: Option<Json>,
    pub failed: bool,
    pub failed_code: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub failed_response: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
