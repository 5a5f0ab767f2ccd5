use common::FileStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One logical file. Rows sharing `content_hash` share a blob on disk.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_metadata")]
pub struct Model {
    /// UUIDv7 primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub owner_id: String,

    /// Lowercase hex SHA-256.
    #[sea_orm(indexed)]
    pub content_hash: String,

    /// Sanitized display name.
    pub name: String,

    pub mime_type: String,

    pub size: i64,

    #[sea_orm(indexed)]
    pub status: FileStatus,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
