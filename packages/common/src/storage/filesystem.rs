use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::BufReader;
use tracing::debug;

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{BlobStore, BoxReader, ORIGINAL_STEM};

const TEMP_DIR: &str = ".tmp";

/// Filesystem-backed content-addressed blob store.
///
/// Every blob gets its own address directory, sharded two levels deep:
/// `{root}/{hex[0..2]}/{hex[2..4]}/{hex}/original.{ext}`, with transcoding
/// output under `{hex}/derived/`. In-progress writes go to `{root}/.tmp` so the
/// final rename never crosses a filesystem boundary.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Create the store, creating and canonicalizing `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        fs::create_dir_all(root).await?;
        fs::create_dir_all(root.join(TEMP_DIR)).await?;
        let root = fs::canonicalize(root).await?;
        Ok(Self { root })
    }

    fn original_file_name(extension: Option<&str>) -> String {
        match extension.map(str::trim).filter(|e| !e.is_empty()) {
            Some(ext) => format!("{ORIGINAL_STEM}.{}", ext.to_ascii_lowercase()),
            None => ORIGINAL_STEM.to_string(),
        }
    }

    async fn find_original(&self, hash: &ContentHash) -> Result<Option<PathBuf>, StorageError> {
        let address = self.address_for(hash);
        let mut entries = match fs::read_dir(&address).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_original = name == ORIGINAL_STEM
                || name
                    .strip_prefix(ORIGINAL_STEM)
                    .is_some_and(|rest| rest.starts_with('.'));
            if is_original && entry.file_type().await?.is_file() {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Remove empty shard directories left behind after a delete.
    async fn prune_shards(&self, hash: &ContentHash) {
        let (first, second) = hash.shard_dirs();
        let inner = self.root.join(&first).join(&second);
        // Non-empty directories fail to delete, which is the intended outcome.
        if fs::remove_dir(&inner).await.is_ok() {
            let _ = fs::remove_dir(self.root.join(&first)).await;
        }
    }
}

/// Join `relative` onto `base`, refusing anything that is not a plain
/// downward path.
fn join_contained(base: &Path, relative: &str) -> Result<PathBuf, StorageError> {
    if relative.contains('\0') {
        return Err(StorageError::PathEscape(relative.escape_default().to_string()));
    }

    let mut out = base.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathEscape(relative.to_string()));
            }
        }
    }

    if depth == 0 {
        return Err(StorageError::NotFound(relative.to_string()));
    }
    Ok(out)
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn address_for(&self, hash: &ContentHash) -> PathBuf {
        let (first, second) = hash.shard_dirs();
        self.root.join(first).join(second).join(hash.to_hex())
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(TEMP_DIR)
            .join(uuid::Uuid::new_v4().to_string())
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        Ok(self.find_original(hash).await?.is_some())
    }

    async fn commit(
        &self,
        temp: &Path,
        hash: &ContentHash,
        extension: Option<&str>,
    ) -> Result<PathBuf, StorageError> {
        if let Some(existing) = self.find_original(hash).await? {
            debug!(hash = %hash, "Blob already present, discarding temp file");
            let _ = fs::remove_file(temp).await;
            return Ok(existing);
        }

        let address = self.address_for(hash);
        if let Err(e) = fs::create_dir_all(&address).await {
            let _ = fs::remove_file(temp).await;
            return Err(e.into());
        }

        let target = address.join(Self::original_file_name(extension));
        if let Err(e) = fs::rename(temp, &target).await {
            let _ = fs::remove_file(temp).await;
            return Err(e.into());
        }

        debug!(hash = %hash, path = %target.display(), "Committed blob");
        Ok(target)
    }

    async fn original_path(&self, hash: &ContentHash) -> Result<PathBuf, StorageError> {
        self.find_original(hash)
            .await?
            .ok_or_else(|| StorageError::NotFound(hash.to_hex()))
    }

    async fn open_original(&self, hash: &ContentHash) -> Result<BoxReader, StorageError> {
        let path = self.original_path(hash).await?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(hash.to_hex()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_derived(
        &self,
        hash: &ContentHash,
        relative: &str,
    ) -> Result<PathBuf, StorageError> {
        let derived = self.derived_dir(hash);
        let candidate = join_contained(&derived, relative)?;

        // Symlinks can still point elsewhere; check the real location too.
        match fs::canonicalize(&candidate).await {
            Ok(real) => {
                if !real.starts_with(&self.root) || !real.starts_with(&derived) {
                    return Err(StorageError::PathEscape(relative.to_string()));
                }
                Ok(real)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(relative.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        let address = self.address_for(hash);
        match fs::remove_dir_all(&address).await {
            Ok(()) => {
                self.prune_shards(hash).await;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
