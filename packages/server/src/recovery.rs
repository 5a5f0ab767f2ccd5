//! Re-enqueues video files whose transcoding job never ran: dropped by a full
//! queue or lost with the in-memory queue on restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::retry::{RetryDecision, RetryTracker};
use common::storage::{BlobStore, ContentHash, StorageError};
use common::{FileStatus, HashLocks, LedgerError, LogicalFile, MetadataLedger, TranscodeJob};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;
use worker::JobQueue;

use crate::config::RecoveryConfig;

/// Counts from one scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Distinct hashes with stale rows.
    pub stale: usize,
    pub requeued: usize,
    /// Still queued or running, or the queue refused the job.
    pub skipped: usize,
    /// Given up on and marked failed.
    pub failed: usize,
}

pub struct RecoveryScanner {
    store: Arc<dyn BlobStore>,
    ledger: Arc<dyn MetadataLedger>,
    queue: JobQueue,
    locks: HashLocks,
    config: RecoveryConfig,
    requeues: Mutex<RetryTracker<Uuid>>,
}

impl RecoveryScanner {
    pub fn new(
        store: Arc<dyn BlobStore>,
        ledger: Arc<dyn MetadataLedger>,
        queue: JobQueue,
        locks: HashLocks,
        config: RecoveryConfig,
    ) -> Self {
        let requeues = Mutex::new(RetryTracker::new(config.max_requeues));
        Self {
            store,
            ledger,
            queue,
            locks,
            config,
            requeues,
        }
    }

    /// Scan forever at the configured interval.
    pub async fn run(self) {
        let scan_interval = Duration::from_secs(self.config.scan_interval_secs.max(1));

        info!(
            stuck_timeout_secs = self.config.stuck_timeout_secs,
            scan_interval_secs = self.config.scan_interval_secs,
            max_requeues = self.config.max_requeues,
            "Starting recovery scanner"
        );

        let mut interval = tokio::time::interval(scan_interval);
        loop {
            interval.tick().await;

            match self.scan_once().await {
                Ok(report) if report.stale > 0 => {
                    info!(
                        stale = report.stale,
                        requeued = report.requeued,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Recovery scan finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Recovery scan failed"),
            }
        }
    }

    pub async fn scan_once(&self) -> Result<ScanReport, LedgerError> {
        let timeout = Duration::from_secs(self.config.stuck_timeout_secs);
        let cutoff = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self.ledger.find_stale(FileStatus::NON_TERMINAL, cutoff).await?;

        // One job per hash, for its earliest file.
        let mut by_hash: HashMap<ContentHash, LogicalFile> = HashMap::new();
        for file in stale {
            by_hash
                .entry(file.content_hash)
                .and_modify(|kept| {
                    if file.created_at < kept.created_at {
                        *kept = file.clone();
                    }
                })
                .or_insert(file);
        }

        let mut report = ScanReport {
            stale: by_hash.len(),
            ..ScanReport::default()
        };

        // Forget budgets for files that have not been seen for a while.
        self.requeues
            .lock()
            .await
            .cleanup_stale(timeout.saturating_mul(u32::from(self.config.max_requeues) + 2));

        for (hash, file) in by_hash {
            if self.queue.is_tracked(&hash) {
                report.skipped += 1;
                continue;
            }

            match self.recover(&hash, &file).await {
                Ok(Recovery::Requeued) => report.requeued += 1,
                Ok(Recovery::Skipped) => report.skipped += 1,
                Ok(Recovery::Failed) => report.failed += 1,
                Err(e) => {
                    warn!(file_id = %file.id, hash = %hash, error = %e, "Failed to recover file");
                }
            }
        }

        Ok(report)
    }

    async fn recover(&self, hash: &ContentHash, file: &LogicalFile) -> Result<Recovery, LedgerError> {
        let source_path = match self.store.original_path(hash).await {
            Ok(path) => path,
            Err(StorageError::NotFound(_)) => {
                warn!(file_id = %file.id, hash = %hash, "Original missing, marking failed");
                self.fail(hash).await?;
                return Ok(Recovery::Failed);
            }
            Err(e) => {
                warn!(file_id = %file.id, hash = %hash, error = %e, "Cannot locate original");
                return Ok(Recovery::Skipped);
            }
        };

        let decision = self
            .requeues
            .lock()
            .await
            .record_failure(&file.id, &format!("stuck in {}", file.status));

        match decision {
            RetryDecision::Exhausted { history } => {
                warn!(
                    file_id = %file.id,
                    hash = %hash,
                    attempts = history.len(),
                    "Re-enqueue budget exhausted, marking failed"
                );
                self.fail(hash).await?;
                Ok(Recovery::Failed)
            }
            RetryDecision::Retry { attempt, .. } => {
                let job = TranscodeJob {
                    file_id: file.id,
                    content_hash: *hash,
                    source_path,
                    output_dir: self.store.derived_dir(hash),
                };

                match self.queue.submit(job) {
                    Ok(()) => {
                        info!(file_id = %file.id, hash = %hash, attempt, status = %file.status, "Re-enqueued stuck file");
                        Ok(Recovery::Requeued)
                    }
                    Err(e) => {
                        warn!(file_id = %file.id, error = %e, "Could not re-enqueue stuck file");
                        Ok(Recovery::Skipped)
                    }
                }
            }
        }
    }

    async fn fail(&self, hash: &ContentHash) -> Result<u64, LedgerError> {
        let _guard = self.locks.lock(*hash).await;
        self.ledger.update_status_by_hash(hash, FileStatus::Failed).await
    }
}

enum Recovery {
    Requeued,
    Skipped,
    Failed,
}
