use std::sync::Arc;
use std::time::Duration;

use common::retry::calculate_backoff;
use common::storage::ContentHash;
use common::{FileStatus, HashGuard, HashLocks, LedgerError, MetadataLedger, TranscodeJob};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::ProcessingError;
use crate::queue::JobReceiver;
use crate::transcoder::{DIAGNOSTICS_FILE, Transcoder};

/// How a single job ended.
#[derive(Debug)]
pub enum JobOutcome {
    Ready,
    Failed(ProcessingError),
    /// Every file referencing the content was deleted or already finished.
    Skipped,
}

/// Fixed set of workers draining the shared [`JobReceiver`].
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
struct WorkerContext {
    ledger: Arc<dyn MetadataLedger>,
    transcoder: Arc<dyn Transcoder>,
    locks: HashLocks,
    max_retries: u8,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl WorkerPool {
    /// Start `config.workers` workers. They run until the queue is closed
    /// and drained.
    pub fn spawn(
        config: &WorkerConfig,
        receiver: JobReceiver,
        ledger: Arc<dyn MetadataLedger>,
        transcoder: Arc<dyn Transcoder>,
        locks: HashLocks,
    ) -> Self {
        let ctx = WorkerContext {
            ledger,
            transcoder,
            locks,
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        };

        let handles = (0..config.workers.max(1))
            .map(|worker_id| tokio::spawn(run_worker(worker_id, receiver.clone(), ctx.clone())))
            .collect();

        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    /// Wait up to `grace` for the workers to finish, then abort the rest.
    /// Interrupted jobs stay non-terminal for the recovery scanner.
    pub async fn shutdown(self, grace: Duration) {
        let aborts: Vec<AbortHandle> = self.handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(grace, self.join()).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "Workers still busy, aborting");
            for handle in aborts {
                handle.abort();
            }
        }
    }
}

async fn run_worker(worker_id: usize, receiver: JobReceiver, ctx: WorkerContext) {
    info!(worker_id, "Transcoding worker started");

    while let Some(lease) = receiver.recv().await {
        let job = lease.job().clone();
        let file_id = job.file_id;
        let hash = job.content_hash;

        info!(worker_id, file_id = %file_id, hash = %hash, "Processing transcode job");

        // Each job runs in its own task so a panic stays with that job.
        // Aborting this worker must reach the job too, or the transcoder
        // child would outlive shutdown.
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move { process_job(worker_id, &task_ctx, &job).await });
        let _abort = AbortOnDrop(task.abort_handle());
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = ProcessingError::Panicked(panic_message(e));
                ctx.write_diagnostics(lease.job(), &err).await;
                let _ = ctx.publish(&hash, FileStatus::Failed).await;
                JobOutcome::Failed(err)
            }
        };

        match outcome {
            JobOutcome::Ready => {
                info!(worker_id, file_id = %file_id, hash = %hash, "Transcode job completed");
            }
            JobOutcome::Failed(e @ ProcessingError::Panicked(_)) => {
                error!(worker_id, file_id = %file_id, hash = %hash, error = %e, "Transcode job aborted");
            }
            JobOutcome::Failed(e) => {
                warn!(worker_id, file_id = %file_id, hash = %hash, error = %e, "Transcode job failed");
            }
            JobOutcome::Skipped => {
                debug!(worker_id, file_id = %file_id, hash = %hash, "Transcode job skipped");
            }
        }

        drop(lease);
    }

    info!(worker_id, "Transcoding worker stopped");
}

async fn process_job(worker_id: usize, ctx: &WorkerContext, job: &TranscodeJob) -> JobOutcome {
    // A ledger error here is logged and the job still runs; the recovery
    // scanner picks the rows up again if the final write also fails.
    if let Ok(0) = ctx.publish(&job.content_hash, FileStatus::Processing).await {
        return JobOutcome::Skipped;
    }

    let mut attempt: u8 = 0;
    let result = loop {
        match ctx.attempt(job).await {
            Ok(output) => break Ok(output),
            Err(ProcessingError::Unreferenced) => return JobOutcome::Skipped,
            Err(e) if e.is_transient() && attempt < ctx.max_retries => {
                attempt += 1;
                let delay = calculate_backoff(attempt, ctx.base_delay_ms, ctx.max_delay_ms);
                warn!(
                    worker_id,
                    file_id = %job.file_id,
                    attempt,
                    max_retries = ctx.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient transcode failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => break Err(e),
        }
    };

    match result {
        Ok(output) => {
            debug!(worker_id, manifest = %output.manifest.display(), "Manifest written");
            let _ = ctx.publish(&job.content_hash, FileStatus::Ready).await;
            JobOutcome::Ready
        }
        Err(e) => {
            ctx.write_diagnostics(job, &e).await;
            let _ = ctx.publish(&job.content_hash, FileStatus::Failed).await;
            JobOutcome::Failed(e)
        }
    }
}

impl WorkerContext {
    async fn attempt(
        &self,
        job: &TranscodeJob,
    ) -> Result<crate::transcoder::TranscodeOutput, ProcessingError> {
        let Some(guard) = self.lock_referenced(&job.content_hash).await else {
            return Err(ProcessingError::Unreferenced);
        };

        // Start from an empty directory so a half-written earlier run
        // cannot leave stray segments behind.
        match tokio::fs::remove_dir_all(&job.output_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ProcessingError::OutputDir(e)),
        }
        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(ProcessingError::OutputDir)?;
        drop(guard);

        self.transcoder
            .transcode(&job.source_path, &job.output_dir)
            .await
    }

    /// Take the hash lock, unless no file references `hash` any more. Past
    /// that point the collector owns the directory and nothing may be
    /// written under it.
    async fn lock_referenced(&self, hash: &ContentHash) -> Option<HashGuard> {
        let guard = self.locks.lock(*hash).await;
        match self.ledger.count_by_hash(hash).await {
            Ok(0) => {
                debug!(hash = %hash, "Content no longer referenced");
                None
            }
            Ok(_) => Some(guard),
            Err(e) => {
                warn!(hash = %hash, error = %e, "Failed to count references, assuming live");
                Some(guard)
            }
        }
    }

    async fn write_diagnostics(&self, job: &TranscodeJob, err: &ProcessingError) {
        let mut report = format!("{err}\n");
        if let Some(output) = err.output() {
            report.push('\n');
            report.push_str(output);
        }

        let Some(_guard) = self.lock_referenced(&job.content_hash).await else {
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(&job.output_dir).await {
            warn!(file_id = %job.file_id, error = %e, "Cannot create directory for diagnostics");
            return;
        }
        let path = job.output_dir.join(DIAGNOSTICS_FILE);
        if let Err(e) = tokio::fs::write(&path, report).await {
            warn!(file_id = %job.file_id, path = %path.display(), error = %e, "Failed to write diagnostics");
        }
    }

    /// Apply `status` to every live file sharing `hash`, under the hash lock.
    async fn publish(&self, hash: &ContentHash, status: FileStatus) -> Result<u64, LedgerError> {
        let _guard = self.locks.lock(*hash).await;
        match self.ledger.update_status_by_hash(hash, status).await {
            Ok(changed) => {
                debug!(hash = %hash, status = %status, changed, "Status published");
                Ok(changed)
            }
            Err(e) => {
                error!(hash = %hash, status = %status, error = %e, "Failed to publish status");
                Err(e)
            }
        }
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
