use chrono::{DateTime, Utc};
use common::{FileStatus, LogicalFile};
use serde::Serialize;
use uuid::Uuid;

use crate::ingest::{IngestReceipt, JobAdmission};

/// Response DTO for a stored file.
#[derive(Serialize, utoipa::ToSchema)]
pub struct FileResponse {
    /// File ID (UUIDv7).
    #[schema(example = "01936f0e-1234-7abc-8000-000000000001")]
    pub id: Uuid,
    /// Sanitized display name.
    #[schema(example = "holiday.mp4")]
    pub name: String,
    #[schema(example = "video/mp4")]
    pub mime_type: String,
    /// Size in bytes.
    #[schema(example = 1048576)]
    pub size: u64,
    /// SHA-256 of the content, lowercase hex.
    #[schema(example = "a1b2c3d4e5f6...")]
    pub content_hash: String,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LogicalFile> for FileResponse {
    fn from(file: LogicalFile) -> Self {
        Self {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            size: file.size,
            content_hash: file.content_hash.to_hex(),
            status: file.status,
            created_at: file.created_at,
            updated_at: file.updated_at,
        }
    }
}

/// Response DTO for an upload.
#[derive(Serialize, utoipa::ToSchema)]
pub struct UploadResponse {
    pub id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub content_hash: String,
    /// `ready` for non-video uploads; videos start `pending`, duplicates copy
    /// the status of the content they share.
    pub status: FileStatus,
    /// The content was already stored.
    pub deduplicated: bool,
    pub job: JobAdmission,
}

impl From<IngestReceipt> for UploadResponse {
    fn from(receipt: IngestReceipt) -> Self {
        Self {
            id: receipt.id,
            name: receipt.name,
            mime_type: receipt.mime_type,
            size: receipt.size,
            content_hash: receipt.content_hash.to_hex(),
            status: receipt.status,
            deduplicated: receipt.deduplicated,
            job: receipt.job,
        }
    }
}
