use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{LedgerError, LogicalFile, MetadataLedger, NewLogicalFile};
use crate::file_status::FileStatus;
use crate::storage::ContentHash;

/// Process-local ledger backed by a concurrent map.
///
/// Used for embedding the store without a database and throughout the tests.
/// Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    files: DashMap<Uuid, LogicalFile>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// All files referencing `hash`, oldest first.
    pub fn files_with_hash(&self, hash: &ContentHash) -> Vec<LogicalFile> {
        let mut files: Vec<LogicalFile> = self
            .files
            .iter()
            .filter(|entry| entry.content_hash == *hash)
            .map(|entry| entry.value().clone())
            .collect();
        files.sort_by_key(|f| (f.created_at, f.id));
        files
    }

    /// Overwrite the last-change timestamp of a file.
    pub fn set_updated_at(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(mut file) = self.files.get_mut(&id) {
            file.updated_at = at;
        }
    }
}

#[async_trait]
impl MetadataLedger for InMemoryLedger {
    async fn insert_logical_file(&self, file: NewLogicalFile) -> Result<Uuid, LedgerError> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        self.files.insert(
            id,
            LogicalFile {
                id,
                owner: file.owner,
                content_hash: file.content_hash,
                name: file.name,
                mime_type: file.mime_type,
                size: file.size,
                status: file.status,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_by_hash(&self, hash: &ContentHash) -> Result<Option<LogicalFile>, LedgerError> {
        Ok(self.files_with_hash(hash).into_iter().next())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<LogicalFile>, LedgerError> {
        Ok(self.files.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_status(&self, id: Uuid, status: FileStatus) -> Result<(), LedgerError> {
        let mut file = self.files.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        file.status = file.status.transition(status)?;
        file.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status_by_hash(
        &self,
        hash: &ContentHash,
        status: FileStatus,
    ) -> Result<u64, LedgerError> {
        let now = Utc::now();
        let mut changed = 0;
        for mut entry in self.files.iter_mut() {
            if entry.content_hash == *hash && entry.status.can_transition_to(status) {
                entry.status = status;
                entry.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_by_id(&self, id: Uuid, owner: &str) -> Result<ContentHash, LedgerError> {
        match self.files.remove_if(&id, |_, file| file.owner == owner) {
            Some((_, file)) => Ok(file.content_hash),
            None if self.files.contains_key(&id) => Err(LedgerError::Denied(id)),
            None => Err(LedgerError::NotFound(id)),
        }
    }

    async fn count_by_hash(&self, hash: &ContentHash) -> Result<u64, LedgerError> {
        Ok(self
            .files
            .iter()
            .filter(|entry| entry.content_hash == *hash)
            .count() as u64)
    }

    async fn find_stale(
        &self,
        statuses: &[FileStatus],
        older_than: DateTime<Utc>,
    ) -> Result<Vec<LogicalFile>, LedgerError> {
        let mut files: Vec<LogicalFile> = self
            .files
            .iter()
            .filter(|entry| statuses.contains(&entry.status) && entry.updated_at <= older_than)
            .map(|entry| entry.value().clone())
            .collect();
        files.sort_by_key(|f| (f.created_at, f.id));
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_file(owner: &str, data: &[u8], status: FileStatus) -> NewLogicalFile {
        NewLogicalFile {
            owner: owner.into(),
            content_hash: ContentHash::compute(data),
            name: "clip.mp4".into(),
            mime_type: "video/mp4".into(),
            size: data.len() as u64,
            status,
        }
    }

    #[tokio::test]
    async fn get_by_hash_returns_oldest() {
        let ledger = InMemoryLedger::new();
        let first = ledger
            .insert_logical_file(new_file("alice", b"same", FileStatus::Ready))
            .await
            .unwrap();
        let _second = ledger
            .insert_logical_file(new_file("bob", b"same", FileStatus::Ready))
            .await
            .unwrap();

        let found = ledger
            .get_by_hash(&ContentHash::compute(b"same"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first);
    }

    #[tokio::test]
    async fn update_status_enforces_transitions() {
        let ledger = InMemoryLedger::new();
        let id = ledger
            .insert_logical_file(new_file("alice", b"v", FileStatus::Pending))
            .await
            .unwrap();

        assert!(matches!(
            ledger.update_status(id, FileStatus::Ready).await,
            Err(LedgerError::InvalidTransition(_))
        ));
        ledger.update_status(id, FileStatus::Processing).await.unwrap();
        ledger.update_status(id, FileStatus::Ready).await.unwrap();

        let file = ledger.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Ready);
    }

    #[tokio::test]
    async fn update_status_unknown_id_is_not_found() {
        let ledger = InMemoryLedger::new();
        assert!(matches!(
            ledger.update_status(Uuid::now_v7(), FileStatus::Processing).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_by_hash_follows_transition_table() {
        let ledger = InMemoryLedger::new();
        let done = ledger
            .insert_logical_file(new_file("a", b"x", FileStatus::Failed))
            .await
            .unwrap();
        let waiting = ledger
            .insert_logical_file(new_file("b", b"x", FileStatus::Pending))
            .await
            .unwrap();
        let running = ledger
            .insert_logical_file(new_file("c", b"x", FileStatus::Processing))
            .await
            .unwrap();

        let changed = ledger
            .update_status_by_hash(&ContentHash::compute(b"x"), FileStatus::Ready)
            .await
            .unwrap();

        assert_eq!(changed, 1);
        for (id, expected) in [
            (done, FileStatus::Failed),
            (waiting, FileStatus::Pending),
            (running, FileStatus::Ready),
        ] {
            assert_eq!(ledger.get_by_id(id).await.unwrap().unwrap().status, expected);
        }

        let claimed = ledger
            .update_status_by_hash(&ContentHash::compute(b"x"), FileStatus::Processing)
            .await
            .unwrap();
        assert_eq!(claimed, 1);
        assert_eq!(
            ledger.get_by_id(waiting).await.unwrap().unwrap().status,
            FileStatus::Processing
        );
    }

    #[tokio::test]
    async fn delete_distinguishes_denied_from_missing() {
        let ledger = InMemoryLedger::new();
        let id = ledger
            .insert_logical_file(new_file("alice", b"d", FileStatus::Ready))
            .await
            .unwrap();

        assert!(matches!(
            ledger.delete_by_id(id, "mallory").await,
            Err(LedgerError::Denied(_))
        ));
        assert_eq!(
            ledger.delete_by_id(id, "alice").await.unwrap(),
            ContentHash::compute(b"d")
        );
        assert!(matches!(
            ledger.delete_by_id(id, "alice").await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn find_stale_filters_by_status_and_age() {
        let ledger = InMemoryLedger::new();
        let old = ledger
            .insert_logical_file(new_file("a", b"1", FileStatus::Processing))
            .await
            .unwrap();
        let _fresh = ledger
            .insert_logical_file(new_file("a", b"2", FileStatus::Processing))
            .await
            .unwrap();
        let _ready = ledger
            .insert_logical_file(new_file("a", b"3", FileStatus::Ready))
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        ledger.set_updated_at(old, cutoff - chrono::Duration::minutes(1));

        let stale = ledger
            .find_stale(FileStatus::NON_TERMINAL, cutoff)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old);
    }
}
