// Storage engine: dedup, name registration and blob reclamation
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;

use crate::db::MetadataDb;
use crate::error::{StorageError, StorageResult};
use crate::hash::ContentHash;
use crate::record::{FileId, FileRecord};
use crate::storage::{
    BlobReader, BlobStore, LocalBlobStore, StagedBlob, StagingArea, StorageConfig,
};

/// Outcome of a garbage collection sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    /// Number of blobs inspected
    pub scanned: usize,
    /// Blobs with no live record referencing them
    pub orphans: Vec<ContentHash>,
    /// Number of orphans actually removed
    pub removed: usize,
}

/// Named file storage over a deduplicating blob store.
///
/// One instance is shared by reference between all request handlers.
/// Mutations (save, delete, gc) run one at a time under the exclusive side
/// of the guard; index reads take the shared side. Staging and blob reads
/// take no lock at all.
///
/// Each mutation's locked section runs as its own task. Dropping the
/// caller's future after that point detaches the task instead of cancelling
/// it, so the index and the blob store are never left half-updated.
pub struct StorageEngine {
    staging: StagingArea,
    shared: Arc<Shared>,
}

/// State touched by the locked sections
struct Shared {
    blobs: Box<dyn BlobStore>,
    index: MetadataDb,
    guard: RwLock<()>,
}

impl StorageEngine {
    /// Open (creating if needed) the on-disk layout under `config.root`
    pub async fn open(config: StorageConfig) -> StorageResult<Self> {
        let blobs = LocalBlobStore::new(config.store_path());
        blobs.initialize().await?;
        Self::with_blob_store(config, Box::new(blobs)).await
    }

    /// Open with a caller-provided blob store. The store must share a
    /// volume with `config.staging_path()`.
    pub async fn with_blob_store(
        config: StorageConfig,
        blobs: Box<dyn BlobStore>,
    ) -> StorageResult<Self> {
        let staging = StagingArea::new(config.staging_path());
        staging.initialize().await?;

        let stale = staging.clear().await?;
        if stale > 0 {
            tracing::warn!("Removed {} stale staging entries from a previous run", stale);
        }

        let index = MetadataDb::open(&config.db_path()).await?;

        tracing::info!("Storage opened at {}", config.root.display());

        Ok(Self {
            staging,
            shared: Arc::new(Shared {
                blobs,
                index,
                guard: RwLock::new(()),
            }),
        })
    }

    /// Run `op` on its own task and wait for it
    async fn detached<T, F, Fut>(&self, op: F) -> StorageResult<T>
    where
        F: FnOnce(Arc<Shared>) -> Fut,
        Fut: Future<Output = StorageResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(op(Arc::clone(&self.shared)))
            .await
            .map_err(|e| StorageError::Consistency(format!("storage task failed: {}", e)))?
    }

    /// Store `content` under `name`, returning the new record's id.
    ///
    /// Dropping the returned future while the upload is being staged
    /// removes the partial temp file. Once staging is done the rest of the
    /// save completes even if the caller goes away.
    pub async fn save<R>(&self, name: &str, content: R) -> StorageResult<FileId>
    where
        R: AsyncRead + Unpin,
    {
        let staged = self.staging.stage(content).await?;
        let name = name.to_string();

        self.detached(move |shared| async move { shared.register(name, staged).await })
            .await
    }

    pub async fn get_info(&self, id: &FileId) -> StorageResult<FileRecord> {
        let _guard = self.shared.guard.read().await;
        self.shared.index.get_by_id(id).await
    }

    pub async fn get_info_by_name(&self, name: &str) -> StorageResult<FileRecord> {
        let _guard = self.shared.guard.read().await;
        self.shared.index.get_by_name(name).await
    }

    /// Open the blob for `hash`. Committed blobs are immutable, so no lock.
    pub async fn get_contents(&self, hash: &ContentHash) -> StorageResult<BlobReader> {
        self.shared.blobs.open(hash).await
    }

    /// Delete `record`, removing its blob if it was the last reference.
    pub async fn delete(&self, record: &FileRecord) -> StorageResult<()> {
        let record = record.clone();

        self.detached(move |shared| async move { shared.unregister(record).await })
            .await
    }

    /// All records, ordered by name
    pub async fn list(&self) -> StorageResult<Vec<FileRecord>> {
        let _guard = self.shared.guard.read().await;
        self.shared.index.list().await
    }

    /// Find (and unless `dry_run`, remove) blobs no record references.
    pub async fn collect_garbage(&self, dry_run: bool) -> StorageResult<GcReport> {
        self.detached(move |shared| async move { shared.sweep(dry_run).await })
            .await
    }

    /// Close the metadata store
    pub async fn close(&self) {
        self.shared.index.close().await;
    }
}

impl Shared {
    async fn register(&self, name: String, staged: StagedBlob) -> StorageResult<FileId> {
        let hash = *staged.hash();

        let _guard = self.guard.write().await;

        if self.index.count_by_name(&name).await? != 0 {
            if let Err(e) = staged.discard().await {
                tracing::warn!("Failed to discard staged upload for {}: {}", name, e);
            }
            return Err(StorageError::DuplicateName(name));
        }

        let introduced = if self.index.count_by_hash(&hash).await? == 0 {
            self.blobs.commit(staged).await?;
            true
        } else {
            tracing::debug!("Content already stored, deduplicating: {}", hash);
            if let Err(e) = staged.discard().await {
                tracing::warn!("Failed to discard staged upload for {}: {}", name, e);
            }
            false
        };

        let record = FileRecord {
            id: FileId::generate(),
            name,
            content_hash: hash,
        };

        if let Err(e) = self.index.insert(&record).await {
            if introduced {
                if let Err(remove_err) = self.blobs.remove(&hash).await {
                    tracing::error!(
                        "Failed to roll back blob {} after index insert failed: {}",
                        hash,
                        remove_err
                    );
                }
            }
            return Err(e);
        }

        tracing::info!("Saved {} as {} ({})", record.name, record.id, hash);

        Ok(record.id)
    }

    async fn unregister(&self, record: FileRecord) -> StorageResult<()> {
        let _guard = self.guard.write().await;

        let hash = &record.content_hash;
        let count = self.index.count_by_hash(hash).await?;

        if count == 0 {
            tracing::error!(
                "No records reference {} while deleting {} ({})",
                hash,
                record.name,
                record.id
            );
            return Err(StorageError::Consistency(format!(
                "no files with hash {} while deleting {}",
                hash, record.name
            )));
        }

        self.index.delete_by_id(&record.id).await?;

        if count == 1 {
            if let Err(e) = self.blobs.remove(hash).await {
                tracing::error!(
                    "Record {} deleted but its blob {} could not be removed: {}",
                    record.id,
                    hash,
                    e
                );
                return Err(StorageError::Consistency(format!(
                    "could not remove file with hash {}: {}",
                    hash, e
                )));
            }
        }

        tracing::info!("Deleted {} ({})", record.name, record.id);

        Ok(())
    }

    async fn sweep(&self, dry_run: bool) -> StorageResult<GcReport> {
        let _guard = self.guard.write().await;

        let mut report = GcReport::default();

        for hash in self.blobs.list().await? {
            report.scanned += 1;
            if self.index.count_by_hash(&hash).await? == 0 {
                report.orphans.push(hash);
            }
        }

        if !dry_run {
            for hash in &report.orphans {
                self.blobs.remove(hash).await?;
                report.removed += 1;
            }
        }

        tracing::info!(
            "Garbage collection: scanned {}, orphans {}, removed {}",
            report.scanned,
            report.orphans.len(),
            report.removed
        );

        Ok(report)
    }
}
