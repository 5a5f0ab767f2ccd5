use std::sync::Arc;

use common::TranscodeJob;
use common::storage::ContentHash;
use dashmap::DashSet;
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;

use crate::error::QueueError;

/// Producer side of the bounded processing queue.
///
/// Submission never waits: a full queue rejects the job and the caller keeps
/// going. The queue also remembers which hashes it has admitted until a worker
/// is done with them, so the same content is never transcoded twice at once.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<TranscodeJob>,
    tracked: Arc<DashSet<ContentHash>>,
    capacity: usize,
}

/// Consumer side, shared by every worker in the pool.
#[derive(Clone)]
pub struct JobReceiver {
    inner: Arc<Mutex<mpsc::Receiver<TranscodeJob>>>,
    tracked: Arc<DashSet<ContentHash>>,
}

/// A job taken off the queue. Dropping it releases the hash.
pub struct JobLease {
    job: TranscodeJob,
    tracked: Arc<DashSet<ContentHash>>,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` waiting jobs.
    pub fn bounded(capacity: usize) -> (Self, JobReceiver) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let tracked = Arc::new(DashSet::new());
        (
            Self {
                sender,
                tracked: Arc::clone(&tracked),
                capacity,
            },
            JobReceiver {
                inner: Arc::new(Mutex::new(receiver)),
                tracked,
            },
        )
    }

    /// Admit a job without waiting.
    pub fn submit(&self, job: TranscodeJob) -> Result<(), QueueError> {
        if !self.tracked.insert(job.content_hash) {
            return Err(QueueError::AlreadyQueued(job));
        }

        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                self.tracked.remove(&job.content_hash);
                Err(QueueError::Full(job))
            }
            Err(TrySendError::Closed(job)) => {
                self.tracked.remove(&job.content_hash);
                Err(QueueError::Closed(job))
            }
        }
    }

    /// Whether a job for `hash` is waiting or running.
    pub fn is_tracked(&self, hash: &ContentHash) -> bool {
        self.tracked.contains(hash)
    }

    /// Jobs waiting to be picked up.
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl JobReceiver {
    /// Wait for the next job. `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<JobLease> {
        let job = self.inner.lock().await.recv().await?;
        Some(JobLease {
            job,
            tracked: Arc::clone(&self.tracked),
        })
    }
}

impl JobLease {
    pub fn job(&self) -> &TranscodeJob {
        &self.job
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.tracked.remove(&self.job.content_hash);
    }
}
