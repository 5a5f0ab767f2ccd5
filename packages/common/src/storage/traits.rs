use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::error::StorageError;
use super::hash::ContentHash;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// File stem of the stored original inside a blob's address directory.
pub const ORIGINAL_STEM: &str = "original";

/// Subdirectory of a blob's address that holds transcoding output.
pub const DERIVED_DIR: &str = "derived";

/// Content-addressed blob storage.
///
/// Each blob owns an address directory holding the original bytes and any
/// derived artifacts produced from them. Canonical paths are written at most
/// once per hash.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Absolute storage root.
    fn root(&self) -> &Path;

    /// Address directory for a hash.
    fn address_for(&self, hash: &ContentHash) -> PathBuf;

    /// Directory receiving derived artifacts for a hash.
    fn derived_dir(&self, hash: &ContentHash) -> PathBuf {
        self.address_for(hash).join(DERIVED_DIR)
    }

    /// A fresh private path for an in-progress write.
    fn temp_path(&self) -> PathBuf;

    /// Check whether an original is stored for this hash.
    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError>;

    /// Install a fully written temporary file as the original for `hash`.
    ///
    /// If an original already exists the temp file is discarded and the
    /// existing path is returned.
    async fn commit(
        &self,
        temp: &Path,
        hash: &ContentHash,
        extension: Option<&str>,
    ) -> Result<PathBuf, StorageError>;

    /// Locate the stored original for a hash.
    async fn original_path(&self, hash: &ContentHash) -> Result<PathBuf, StorageError>;

    /// Open the stored original as a streaming reader.
    async fn open_original(&self, hash: &ContentHash) -> Result<BoxReader, StorageError>;

    /// Resolve a client-supplied path relative to the derived directory.
    ///
    /// Fails with [`StorageError::PathEscape`] if the result would leave it.
    async fn resolve_derived(
        &self,
        hash: &ContentHash,
        relative: &str,
    ) -> Result<PathBuf, StorageError>;

    /// Remove the address directory (original plus derived artifacts).
    ///
    /// Returns `true` if something was deleted, `false` if nothing existed.
    async fn delete(&self, hash: &ContentHash) -> Result<bool, StorageError>;
}
