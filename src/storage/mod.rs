// Blob storage trait and implementations

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::hash::ContentHash;

pub mod config;
pub mod local;
pub mod staging;

pub use config::StorageConfig;
pub use local::LocalBlobStore;
pub use staging::{StagedBlob, StagingArea};

/// Readable byte stream over a committed blob
pub type BlobReader = tokio::fs::File;

/// Content-addressed blob store.
///
/// Blobs are immutable once committed. The store has no notion of
/// references; deciding when a blob may be removed is the engine's job.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Check whether a blob with this hash is stored
    async fn exists(&self, hash: &ContentHash) -> StorageResult<bool>;

    /// Open a stored blob for reading; `NotFound` if absent
    async fn open(&self, hash: &ContentHash) -> StorageResult<BlobReader>;

    /// Atomically move staged data to its content-addressed location
    async fn commit(&self, staged: StagedBlob) -> StorageResult<()>;

    /// Remove a stored blob
    async fn remove(&self, hash: &ContentHash) -> StorageResult<()>;

    /// Hashes of every stored blob
    async fn list(&self) -> StorageResult<Vec<ContentHash>>;
}
