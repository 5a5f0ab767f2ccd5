use std::time::Duration;

use thiserror::Error;

/// Failure of a single transcoding job.
///
/// Always contained to that job: the worker records it and moves on.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("failed to prepare output directory: {0}")]
    OutputDir(#[source] std::io::Error),

    #[error("failed to start transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("transcoder timed out after {0:?}")]
    Timeout(Duration),

    #[error("transcoder exited with {code:?}")]
    ExitStatus { code: Option<i32>, output: String },

    #[error("transcoder finished but produced no manifest")]
    MissingManifest { output: String },

    #[error("transcoding task panicked: {0}")]
    Panicked(String),

    /// Every file referencing the content was deleted mid-job.
    #[error("content is no longer referenced")]
    Unreferenced,
}

impl ProcessingError {
    /// Failures worth another attempt. A non-zero exit means the input or the
    /// arguments are bad and will stay bad.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::OutputDir(_) | Self::Spawn(_) | Self::Timeout(_)
        )
    }

    /// Captured transcoder output, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::ExitStatus { output, .. } | Self::MissingManifest { output } => Some(output),
            _ => None,
        }
    }
}

/// Why a job was not admitted to the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("processing queue is full")]
    Full(common::TranscodeJob),

    #[error("a job for this content is already queued or running")]
    AlreadyQueued(common::TranscodeJob),

    #[error("processing queue is closed")]
    Closed(common::TranscodeJob),
}

impl QueueError {
    /// Recover the rejected job.
    pub fn into_job(self) -> common::TranscodeJob {
        match self {
            Self::Full(job) | Self::AlreadyQueued(job) | Self::Closed(job) => job,
        }
    }
}
