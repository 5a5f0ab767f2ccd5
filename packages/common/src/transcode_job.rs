use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::ContentHash;

/// A transcoding job handed from ingestion to the worker pool.
///
/// Lives only in memory; a restart loses it and the recovery scanner
/// re-creates it from the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeJob {
    /// Logical file whose upload created the job
    pub file_id: Uuid,
    /// Blob being transcoded
    pub content_hash: ContentHash,
    /// Stored original
    pub source_path: PathBuf,
    /// Directory receiving the manifest and segments
    pub output_dir: PathBuf,
}
