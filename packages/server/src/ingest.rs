//! Upload ingestion: one streaming pass that stores the bytes, hashes them and
//! registers a logical file, deduplicating by content.

use std::path::Path;
use std::sync::Arc;

use common::media::{self, MediaClass, SNIFF_LEN};
use common::storage::{BlobStore, ContentHash, ContentHasher, StorageError};
use common::{
    FileStatus, HashLocks, LedgerError, MetadataLedger, NewLogicalFile, StorageConfig,
    TranscodeJob,
};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use worker::{JobQueue, QueueError};

use crate::utils::filename::sanitize_filename;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),

    #[error("upload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("unsupported media type: {0}")]
    UnsupportedType(String),

    #[error("content does not match declared type {0}")]
    ContentMismatch(String),

    #[error("failed to read upload: {0}")]
    Read(#[source] std::io::Error),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Everything known about an upload before its bytes are read.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner: String,
    pub filename: String,
    pub mime_type: String,
    /// Size announced by the client, checked before streaming.
    pub declared_size: Option<u64>,
}

/// What happened to the transcoding job for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobAdmission {
    Queued,
    /// The queue was full; the file stays `pending` until recovery picks it up.
    Dropped,
    /// Not a new video blob.
    NotApplicable,
}

#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub id: Uuid,
    pub content_hash: ContentHash,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub status: FileStatus,
    /// The bytes were already stored under this hash.
    pub deduplicated: bool,
    pub job: JobAdmission,
}

/// Bytes written to a temp file, hashed but not yet committed.
struct Staged {
    hash: ContentHash,
    size: u64,
}

pub struct IngestionPipeline {
    store: Arc<dyn BlobStore>,
    ledger: Arc<dyn MetadataLedger>,
    queue: JobQueue,
    locks: HashLocks,
    config: StorageConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn BlobStore>,
        ledger: Arc<dyn MetadataLedger>,
        queue: JobQueue,
        locks: HashLocks,
        config: StorageConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            queue,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Reject a request before any body bytes are read.
    pub fn validate(&self, request: &UploadRequest) -> Result<MediaClass, IngestError> {
        if request.owner.trim().is_empty() {
            return Err(IngestError::Validation("missing owner".into()));
        }

        let mime = media::essence(&request.mime_type);
        if !media::is_allowed(&mime, &self.config.allowed_types) {
            return Err(IngestError::UnsupportedType(mime));
        }

        let class = MediaClass::classify(&mime);
        let limit = self.config.limit_for(class);
        if let Some(declared) = request.declared_size
            && declared > limit
        {
            return Err(IngestError::TooLarge { limit });
        }

        Ok(class)
    }

    #[instrument(skip_all, fields(owner = %request.owner, hash = tracing::field::Empty))]
    pub async fn ingest<R>(&self, request: UploadRequest, body: R) -> Result<IngestReceipt, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let class = self.validate(&request)?;
        let mime = media::essence(&request.mime_type);
        let name = sanitize_filename(&request.filename);
        let limit = self.config.limit_for(class);

        let temp = self.store.temp_path();
        let staged = match self.stage(&temp, body, limit, &mime).await {
            Ok(staged) => staged,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(e);
            }
        };
        tracing::Span::current().record("hash", tracing::field::display(&staged.hash));

        let extension = media::extension_for(&request.filename, &mime);
        let new_file = NewLogicalFile {
            owner: request.owner,
            content_hash: staged.hash,
            name,
            mime_type: mime,
            size: staged.size,
            status: FileStatus::Ready,
        };

        let result = self
            .register(&temp, new_file, class, extension.as_deref())
            .await;
        // Commit consumes the temp file; anything left is from a failed path.
        let _ = fs::remove_file(&temp).await;
        let (mut receipt, job) = result?;

        if let Some(job) = job {
            receipt.job = self.submit(job);
        }

        info!(
            file_id = %receipt.id,
            hash = %receipt.content_hash,
            size = receipt.size,
            status = %receipt.status,
            deduplicated = receipt.deduplicated,
            "Upload stored"
        );

        Ok(receipt)
    }

    /// Stream `body` into `temp`, hashing and counting as it goes.
    async fn stage<R>(
        &self,
        temp: &Path,
        mut body: R,
        limit: u64,
        mime: &str,
    ) -> Result<Staged, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut file = fs::File::create(temp).await.map_err(StorageError::from)?;
        let mut hasher = ContentHasher::new();
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = body.read(&mut buf).await.map_err(IngestError::Read)?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];

            if hasher.bytes() + n as u64 > limit {
                return Err(IngestError::TooLarge { limit });
            }
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(n);
                head.extend_from_slice(&chunk[..take]);
            }

            hasher.update(chunk);
            file.write_all(chunk).await.map_err(StorageError::from)?;
        }

        file.flush().await.map_err(StorageError::from)?;
        drop(file);

        if hasher.bytes() == 0 {
            return Err(IngestError::Validation("file is empty".into()));
        }
        if self.config.verify_content_type && !media::sniff_matches(mime, &head) {
            return Err(IngestError::ContentMismatch(mime.to_string()));
        }

        let (hash, size) = hasher.finalize();
        Ok(Staged { hash, size })
    }

    /// Decide between duplicate and new blob and write the ledger row, all
    /// under the hash lock so the garbage collector cannot interleave.
    async fn register(
        &self,
        temp: &Path,
        mut file: NewLogicalFile,
        class: MediaClass,
        extension: Option<&str>,
    ) -> Result<(IngestReceipt, Option<TranscodeJob>), IngestError> {
        let hash = file.content_hash;
        let _guard = self.locks.lock(hash).await;

        if let Some(existing) = self.ledger.get_by_hash(&hash).await? {
            if existing.size != file.size {
                return Err(IngestError::Integrity(format!(
                    "hash {hash} is recorded with {} bytes but the upload has {}",
                    existing.size, file.size
                )));
            }

            if self.store.exists(&hash).await? {
                let _ = fs::remove_file(temp).await;
            } else {
                warn!(hash = %hash, "Ledger references a missing blob, restoring it from this upload");
                self.store.commit(temp, &hash, extension).await?;
            }

            file.status = existing.status;
            let id = self.ledger.insert_logical_file(file.clone()).await?;
            debug!(file_id = %id, existing = %existing.id, "Duplicate upload");

            return Ok((receipt(id, file, true, JobAdmission::NotApplicable), None));
        }

        let source_path = self.store.commit(temp, &hash, extension).await?;

        file.status = if class.is_video() {
            FileStatus::Pending
        } else {
            FileStatus::Ready
        };

        let id = match self.ledger.insert_logical_file(file.clone()).await {
            Ok(id) => id,
            Err(e) => {
                // Nothing references the blob we just installed.
                if let Err(cleanup) = self.store.delete(&hash).await {
                    warn!(hash = %hash, error = %cleanup, "Failed to remove unregistered blob");
                }
                return Err(e.into());
            }
        };

        let job = class.is_video().then(|| TranscodeJob {
            file_id: id,
            content_hash: hash,
            source_path,
            output_dir: self.store.derived_dir(&hash),
        });

        Ok((receipt(id, file, false, JobAdmission::NotApplicable), job))
    }

    fn submit(&self, job: TranscodeJob) -> JobAdmission {
        let file_id = job.file_id;
        match self.queue.submit(job) {
            Ok(()) => JobAdmission::Queued,
            Err(QueueError::AlreadyQueued(_)) => JobAdmission::Queued,
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "Transcode job not admitted, file stays pending");
                JobAdmission::Dropped
            }
        }
    }
}

fn receipt(id: Uuid, file: NewLogicalFile, deduplicated: bool, job: JobAdmission) -> IngestReceipt {
    IngestReceipt {
        id,
        content_hash: file.content_hash,
        name: file.name,
        mime_type: file.mime_type,
        size: file.size,
        status: file.status,
        deduplicated,
        job,
    }
}
