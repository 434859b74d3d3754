//! Named file storage over a deduplicating content-addressed blob store.
//!
//! Uploads are staged and hashed in parallel, then committed under a single
//! exclusive section that checks the name, deduplicates by content hash and
//! registers the record. A blob lives exactly as long as some record
//! references its hash.

pub mod db;
pub mod engine;
pub mod error;
pub mod hash;
pub mod record;
pub mod server;
pub mod storage;

pub use engine::{GcReport, StorageEngine};
pub use error::{StorageError, StorageResult};
pub use hash::ContentHash;
pub use record::{FileId, FileRecord};
pub use storage::StorageConfig;
