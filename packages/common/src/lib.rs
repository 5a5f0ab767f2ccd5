pub mod config;
pub mod file_status;
pub mod ledger;
pub mod locks;
pub mod media;
pub mod retry;
pub mod storage;
pub mod transcode_job;

pub use config::StorageConfig;
pub use file_status::{FileStatus, InvalidTransition};
pub use ledger::{InMemoryLedger, LedgerError, LogicalFile, MetadataLedger, NewLogicalFile};
pub use locks::{HashGuard, HashLocks};
pub use media::MediaClass;
pub use transcode_job::TranscodeJob;
