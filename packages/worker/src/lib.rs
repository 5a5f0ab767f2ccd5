//! Background transcoding: a bounded in-memory queue feeding a fixed pool
//! of workers that run ffmpeg and publish the result to the ledger.

pub mod config;
pub mod error;
pub mod pool;
pub mod queue;
pub mod transcoder;

pub use config::WorkerConfig;
pub use error::{ProcessingError, QueueError};
pub use pool::{JobOutcome, WorkerPool};
pub use queue::{JobLease, JobQueue, JobReceiver};
pub use transcoder::{DIAGNOSTICS_FILE, FfmpegTranscoder, MANIFEST_NAME, TranscodeOutput, Transcoder};
