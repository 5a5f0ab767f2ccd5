//! [`MetadataLedger`] backed by the `file_metadata` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::storage::ContentHash;
use common::{FileStatus, InvalidTransition, LedgerError, LogicalFile, MetadataLedger, NewLogicalFile};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::entity::file_metadata;

#[derive(Clone)]
pub struct SeaOrmLedger {
    db: DatabaseConnection,
}

impl SeaOrmLedger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn backend(err: DbErr) -> LedgerError {
    LedgerError::Backend(err.to_string())
}

fn to_logical(model: file_metadata::Model) -> Result<LogicalFile, LedgerError> {
    let content_hash = ContentHash::from_hex(&model.content_hash).map_err(|e| {
        LedgerError::Backend(format!("row {} has a corrupt content hash: {e}", model.id))
    })?;

    Ok(LogicalFile {
        id: model.id,
        owner: model.owner_id,
        content_hash,
        name: model.name,
        mime_type: model.mime_type,
        size: u64::try_from(model.size).unwrap_or_default(),
        status: model.status,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

/// Statuses a row may hold for a move to `status` to be legal.
fn allowed_from(status: FileStatus) -> Vec<FileStatus> {
    FileStatus::ALL
        .iter()
        .copied()
        .filter(|from| from.can_transition_to(status))
        .collect()
}

fn status_change(status: FileStatus) -> file_metadata::ActiveModel {
    file_metadata::ActiveModel {
        status: Set(status),
        updated_at: Set(Utc::now()),
        ..Default::default()
    }
}

#[async_trait]
impl MetadataLedger for SeaOrmLedger {
    async fn insert_logical_file(&self, file: NewLogicalFile) -> Result<Uuid, LedgerError> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        let row = file_metadata::ActiveModel {
            id: Set(id),
            owner_id: Set(file.owner),
            content_hash: Set(file.content_hash.to_hex()),
            name: Set(file.name),
            mime_type: Set(file.mime_type),
            size: Set(i64::try_from(file.size).unwrap_or(i64::MAX)),
            status: Set(file.status),
            created_at: Set(now),
            updated_at: Set(now),
        };

        file_metadata::Entity::insert(row)
            .exec_without_returning(&self.db)
            .await
            .map_err(backend)?;

        Ok(id)
    }

    async fn get_by_hash(&self, hash: &ContentHash) -> Result<Option<LogicalFile>, LedgerError> {
        file_metadata::Entity::find()
            .filter(file_metadata::Column::ContentHash.eq(hash.to_hex()))
            .order_by_asc(file_metadata::Column::CreatedAt)
            .order_by_asc(file_metadata::Column::Id)
            .one(&self.db)
            .await
            .map_err(backend)?
            .map(to_logical)
            .transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<LogicalFile>, LedgerError> {
        file_metadata::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(backend)?
            .map(to_logical)
            .transpose()
    }

    async fn update_status(&self, id: Uuid, status: FileStatus) -> Result<(), LedgerError> {
        // Compare-and-set: the row only changes if its current status may
        // legally move to `status`.
        let result = file_metadata::Entity::update_many()
            .set(status_change(status))
            .filter(file_metadata::Column::Id.eq(id))
            .filter(file_metadata::Column::Status.is_in(allowed_from(status)))
            .exec(&self.db)
            .await
            .map_err(backend)?;

        if result.rows_affected > 0 {
            return Ok(());
        }

        match self.get_by_id(id).await? {
            None => Err(LedgerError::NotFound(id)),
            Some(current) => Err(InvalidTransition {
                from: current.status,
                to: status,
            }
            .into()),
        }
    }

    async fn update_status_by_hash(
        &self,
        hash: &ContentHash,
        status: FileStatus,
    ) -> Result<u64, LedgerError> {
        let result = file_metadata::Entity::update_many()
            .set(status_change(status))
            .filter(file_metadata::Column::ContentHash.eq(hash.to_hex()))
            .filter(file_metadata::Column::Status.is_in(allowed_from(status)))
            .exec(&self.db)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected)
    }

    async fn delete_by_id(&self, id: Uuid, owner: &str) -> Result<ContentHash, LedgerError> {
        let row = file_metadata::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(backend)?
            .ok_or(LedgerError::NotFound(id))?;

        if row.owner_id != owner {
            return Err(LedgerError::Denied(id));
        }

        let result = file_metadata::Entity::delete_many()
            .filter(file_metadata::Column::Id.eq(id))
            .filter(file_metadata::Column::OwnerId.eq(owner))
            .exec(&self.db)
            .await
            .map_err(backend)?;

        // Lost a race with another delete of the same row.
        if result.rows_affected == 0 {
            return Err(LedgerError::NotFound(id));
        }

        Ok(to_logical(row)?.content_hash)
    }

    async fn count_by_hash(&self, hash: &ContentHash) -> Result<u64, LedgerError> {
        file_metadata::Entity::find()
            .filter(file_metadata::Column::ContentHash.eq(hash.to_hex()))
            .count(&self.db)
            .await
            .map_err(backend)
    }

    async fn find_stale(
        &self,
        statuses: &[FileStatus],
        older_than: DateTime<Utc>,
    ) -> Result<Vec<LogicalFile>, LedgerError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        file_metadata::Entity::find()
            .filter(file_metadata::Column::Status.is_in(statuses.iter().copied()))
            .filter(file_metadata::Column::UpdatedAt.lte(older_than))
            .order_by_asc(file_metadata::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(backend)?
            .into_iter()
            .map(to_logical)
            .collect()
    }
}
