mod error;
mod hash;
mod traits;

pub mod filesystem;

pub use error::StorageError;
pub use hash::{ContentHash, ContentHasher};
pub use traits::{BlobStore, BoxReader, DERIVED_DIR, ORIGINAL_STEM};
