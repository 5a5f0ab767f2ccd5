//! Contract for the durable record of logical files.
//!
//! The core never talks to a database directly: ingestion, the worker pool,
//! the garbage collector and the recovery scanner all go through
//! [`MetadataLedger`]. "Not found" and "not yours" are reported as distinct
//! variants so callers never confuse them with a backend outage.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::file_status::{FileStatus, InvalidTransition};
use crate::storage::ContentHash;

pub use memory::InMemoryLedger;

/// One user-visible upload. Many logical files may share a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalFile {
    pub id: Uuid,
    pub owner: String,
    pub content_hash: ContentHash,
    /// Sanitized display name.
    pub name: String,
    /// MIME type as declared by the uploader.
    pub mime_type: String,
    pub size: u64,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    /// Time of the last status change.
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when registering a logical file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogicalFile {
    pub owner: String,
    pub content_hash: ContentHash,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub status: FileStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("logical file not found: {0}")]
    NotFound(Uuid),

    #[error("logical file {0} is not owned by the caller")]
    Denied(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("ledger backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait MetadataLedger: Send + Sync {
    /// Register a new logical file and return its identifier.
    async fn insert_logical_file(&self, file: NewLogicalFile) -> Result<Uuid, LedgerError>;

    /// The oldest logical file referencing `hash`, if any.
    async fn get_by_hash(&self, hash: &ContentHash) -> Result<Option<LogicalFile>, LedgerError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<LogicalFile>, LedgerError>;

    /// Move one file to `status`, enforcing the lifecycle transition table.
    async fn update_status(&self, id: Uuid, status: FileStatus) -> Result<(), LedgerError>;

    /// Apply `status` to every file sharing `hash` whose current status may
    /// legally move there. Other rows are left alone.
    ///
    /// This is how one transcoding result is shared by all duplicates.
    /// Returns the number of rows changed.
    async fn update_status_by_hash(
        &self,
        hash: &ContentHash,
        status: FileStatus,
    ) -> Result<u64, LedgerError>;

    /// Delete a file owned by `owner`, returning the hash it referenced.
    async fn delete_by_id(&self, id: Uuid, owner: &str) -> Result<ContentHash, LedgerError>;

    /// Number of logical files still referencing `hash`.
    async fn count_by_hash(&self, hash: &ContentHash) -> Result<u64, LedgerError>;

    /// Files in one of `statuses` whose last status change is at or before `older_than`.
    async fn find_stale(
        &self,
        statuses: &[FileStatus],
        older_than: DateTime<Utc>,
    ) -> Result<Vec<LogicalFile>, LedgerError>;
}
