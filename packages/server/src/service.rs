use std::path::PathBuf;
use std::sync::Arc;

use common::storage::{BlobStore, BoxReader, StorageError};
use common::{FileStatus, HashLocks, LedgerError, LogicalFile, MetadataLedger, StorageConfig};
use thiserror::Error;
use tokio::io::AsyncRead;
use uuid::Uuid;
use worker::JobQueue;

use crate::gc::{GarbageCollector, GcError, GcOutcome};
use crate::ingest::{IngestError, IngestReceipt, IngestionPipeline, UploadRequest};

/// Why a stored file could not be read.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("file {id} is {status}, not ready")]
    NotReady { id: Uuid, status: FileStatus },
}

/// The object store as the HTTP layer sees it: ingestion, reads and deletes
/// over one blob store and ledger.
#[derive(Clone)]
pub struct ObjectStore {
    inner: Arc<Inner>,
}

struct Inner {
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<dyn MetadataLedger>,
    queue: JobQueue,
    pipeline: IngestionPipeline,
    gc: GarbageCollector,
}

impl ObjectStore {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        ledger: Arc<dyn MetadataLedger>,
        queue: JobQueue,
        locks: HashLocks,
        config: StorageConfig,
    ) -> Self {
        let pipeline = IngestionPipeline::new(
            Arc::clone(&blobs),
            Arc::clone(&ledger),
            queue.clone(),
            locks.clone(),
            config,
        );
        let gc = GarbageCollector::new(Arc::clone(&blobs), Arc::clone(&ledger), locks);

        Self {
            inner: Arc::new(Inner {
                blobs,
                ledger,
                queue,
                pipeline,
                gc,
            }),
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    pub fn ledger(&self) -> &Arc<dyn MetadataLedger> {
        &self.inner.ledger
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }

    pub fn storage_config(&self) -> &StorageConfig {
        self.inner.pipeline.config()
    }

    pub fn validate_upload(&self, request: &UploadRequest) -> Result<(), IngestError> {
        self.inner.pipeline.validate(request).map(|_| ())
    }

    pub async fn upload<R>(&self, request: UploadRequest, body: R) -> Result<IngestReceipt, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.inner.pipeline.ingest(request, body).await
    }

    /// A file owned by `owner`. Files owned by someone else are reported as
    /// [`LedgerError::Denied`].
    pub async fn get_file(&self, id: Uuid, owner: &str) -> Result<LogicalFile, LedgerError> {
        let file = self
            .inner
            .ledger
            .get_by_id(id)
            .await?
            .ok_or(LedgerError::NotFound(id))?;
        if file.owner != owner {
            return Err(LedgerError::Denied(id));
        }
        Ok(file)
    }

    pub async fn delete_file(&self, id: Uuid, owner: &str) -> Result<GcOutcome, GcError> {
        self.inner.gc.delete_file(id, owner).await
    }

    /// Open the original bytes of a ready file.
    pub async fn open_original(
        &self,
        id: Uuid,
        owner: &str,
    ) -> Result<(LogicalFile, BoxReader), AccessError> {
        let file = self.ready_file(id, owner).await?;
        let reader = self.inner.blobs.open_original(&file.content_hash).await?;
        Ok((file, reader))
    }

    /// Resolve a transcoding artifact of a ready file, refusing any path that
    /// leaves its derived directory.
    pub async fn resolve_artifact(
        &self,
        id: Uuid,
        owner: &str,
        relative: &str,
    ) -> Result<(LogicalFile, PathBuf), AccessError> {
        let file = self.ready_file(id, owner).await?;
        let path = self
            .inner
            .blobs
            .resolve_derived(&file.content_hash, relative)
            .await?;
        Ok((file, path))
    }

    async fn ready_file(&self, id: Uuid, owner: &str) -> Result<LogicalFile, AccessError> {
        let file = self.get_file(id, owner).await?;
        if !file.status.is_downloadable() {
            return Err(AccessError::NotReady {
                id,
                status: file.status,
            });
        }
        Ok(file)
    }
}
