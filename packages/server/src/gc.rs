use std::sync::Arc;

use common::storage::{BlobStore, ContentHash, StorageError};
use common::{HashLocks, LedgerError, MetadataLedger};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GcError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcOutcome {
    pub content_hash: ContentHash,
    /// The deleted file held the last reference and the blob is gone.
    pub blob_removed: bool,
}

/// Deletes logical files and reclaims blobs nothing references any more.
///
/// The row delete, the reference count and the blob removal all happen under
/// the hash lock that ingestion takes for the same content, so an upload can
/// never register against a blob that is about to disappear.
pub struct GarbageCollector {
    store: Arc<dyn BlobStore>,
    ledger: Arc<dyn MetadataLedger>,
    locks: HashLocks,
}

impl GarbageCollector {
    pub fn new(store: Arc<dyn BlobStore>, ledger: Arc<dyn MetadataLedger>, locks: HashLocks) -> Self {
        Self {
            store,
            ledger,
            locks,
        }
    }

    #[instrument(skip(self))]
    pub async fn delete_file(&self, id: Uuid, owner: &str) -> Result<GcOutcome, GcError> {
        let file = self
            .ledger
            .get_by_id(id)
            .await?
            .ok_or(LedgerError::NotFound(id))?;
        if file.owner != owner {
            return Err(LedgerError::Denied(id).into());
        }

        let _guard = self.locks.lock(file.content_hash).await;
        let freed = self.ledger.delete_by_id(id, owner).await?;

        let remaining = self.ledger.count_by_hash(&freed).await?;
        if remaining > 0 {
            info!(file_id = %id, hash = %freed, remaining, "File deleted, blob still referenced");
            return Ok(GcOutcome {
                content_hash: freed,
                blob_removed: false,
            });
        }

        let blob_removed = self.store.delete(&freed).await?;
        info!(file_id = %id, hash = %freed, blob_removed, "File deleted, last reference released");

        Ok(GcOutcome {
            content_hash: freed,
            blob_removed,
        })
    }
}
