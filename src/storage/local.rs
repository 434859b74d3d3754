// Local filesystem blob store
use super::{BlobReader, BlobStore, StagedBlob};
use crate::error::{IoResultExt, StorageError, StorageResult};
use crate::hash::ContentHash;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

/// Local filesystem blob store
///
/// Stores blobs in a hierarchical directory structure based on hash:
/// `files/{hash[:2]}/{hash[2:4]}/{full_hash}`
///
/// The staging area must live on the same volume so that commits are
/// plain renames.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Convert a content hash to its storage path
    ///
    /// Uses hierarchical directory structure: `{hash[:2]}/{hash[2:4]}/{full_hash}`
    /// This avoids having too many files in a single directory.
    fn hash_to_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();

        self.root.join(&hex[..2]).join(&hex[2..4]).join(&hex)
    }

    /// Get the content subtree root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the content subtree if it doesn't exist
    pub async fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await.at_path(&self.root)?;
        Ok(())
    }

    /// Clean up empty shard directories after blob removal
    async fn cleanup_empty_dirs(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // Only succeeds if the directory is empty
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn exists(&self, hash: &ContentHash) -> StorageResult<bool> {
        let path = self.hash_to_path(hash);
        fs::try_exists(&path).await.at_path(&path)
    }

    async fn open(&self, hash: &ContentHash) -> StorageResult<BlobReader> {
        let path = self.hash_to_path(hash);

        match fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("blob {}", hash)))
            }
            Err(e) => Err(e).at_path(&path),
        }
    }

    async fn commit(&self, staged: StagedBlob) -> StorageResult<()> {
        let path = self.hash_to_path(staged.hash());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.at_path(parent)?;
        }

        // On error `staged` is dropped and removes the temp file
        fs::rename(staged.path(), &path).await.at_path(&path)?;

        tracing::info!("Stored blob: {} ({} bytes)", staged.hash(), staged.size());
        staged.committed();

        Ok(())
    }

    async fn remove(&self, hash: &ContentHash) -> StorageResult<()> {
        let path = self.hash_to_path(hash);

        fs::remove_file(&path).await.at_path(&path)?;
        tracing::info!("Removed blob: {}", hash);

        self.cleanup_empty_dirs(&path).await;

        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<ContentHash>> {
        let mut hashes = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.at_path(&dir)?;
            while let Some(entry) = entries.next_entry().await.at_path(&dir)? {
                if entry.file_type().await.at_path(&entry.path())?.is_dir() {
                    pending.push(entry.path());
                    continue;
                }

                let name = entry.file_name();
                match name.to_str().map(ContentHash::from_str) {
                    Some(Ok(hash)) => hashes.push(hash),
                    _ => tracing::warn!(
                        "Ignoring unexpected file in blob store: {}",
                        entry.path().display()
                    ),
                }
            }
        }

        Ok(hashes)
    }
}
