// Staging area for incoming uploads
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{IoResultExt, StorageResult};
use crate::hash::{ContentHash, ContentHasher};

const CHUNK_SIZE: usize = 16384;

/// Private directory where uploads are written and hashed before commit.
///
/// Staging never touches shared state, so any number of uploads may be
/// staged in parallel without holding the engine's guard.
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create the staging directory if it doesn't exist
    pub async fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.dir).await.at_path(&self.dir)?;
        Ok(())
    }

    /// Remove every leftover entry, returning how many were removed.
    ///
    /// Only valid while no upload is in flight, i.e. at startup.
    pub async fn clear(&self) -> StorageResult<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await.at_path(&self.dir)?;

        while let Some(entry) = entries.next_entry().await.at_path(&self.dir)? {
            let path = entry.path();
            if entry.file_type().await.at_path(&path)?.is_dir() {
                fs::remove_dir_all(&path).await.at_path(&path)?;
            } else {
                fs::remove_file(&path).await.at_path(&path)?;
            }
            tracing::debug!("Removed stale staging entry: {}", path.display());
            removed += 1;
        }

        Ok(removed)
    }

    /// Drain `reader` into a fresh temporary file while hashing it.
    ///
    /// On failure the temporary file is removed before the error is returned.
    pub async fn stage<R>(&self, mut reader: R) -> StorageResult<StagedBlob>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.dir.join(Uuid::new_v4().simple().to_string());

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .at_path(&path)?;

        // From here on the guard owns the temp file; any early return drops it.
        let mut staged = StagedBlob {
            path,
            hash: ContentHash::from_bytes(b""),
            size: 0,
            armed: true,
        };

        let mut hasher = ContentHasher::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer).await.at_path(&staged.path)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            file.write_all(&buffer[..bytes_read])
                .await
                .at_path(&staged.path)?;
        }

        file.flush().await.at_path(&staged.path)?;
        file.sync_all().await.at_path(&staged.path)?;
        drop(file);

        staged.hash = hasher.finalize();
        staged.size = hasher.len();

        tracing::debug!(
            "Staged upload {} ({} bytes) at {}",
            staged.hash,
            staged.size,
            staged.path.display()
        );

        Ok(staged)
    }
}

/// Handle to fully written, hashed data in the staging area.
///
/// The temporary file is removed when the handle is dropped unless it was
/// committed into the blob store first.
#[derive(Debug)]
pub struct StagedBlob {
    path: PathBuf,
    hash: ContentHash,
    size: u64,
    armed: bool,
}

impl StagedBlob {
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the data as relocated; the file is no longer ours to remove.
    pub fn committed(mut self) {
        self.armed = false;
    }

    /// Remove the temporary data. Idempotent.
    pub async fn discard(mut self) -> StorageResult<()> {
        self.armed = false;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).at_path(&self.path),
        }
    }
}

impl Drop for StagedBlob {
    // Runs on whatever thread drops the handle, possibly a runtime worker.
    // A single unlink is short enough to do inline.
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        "Failed to remove staged file {}: {}",
                        self.path.display(),
                        e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::ReadBuf;

    async fn create_test_staging() -> (StagingArea, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::new(temp_dir.path().join("temp"));
        staging.initialize().await.unwrap();
        (staging, temp_dir)
    }

    async fn entry_count(dir: &Path) -> usize {
        let mut entries = fs::read_dir(dir).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    /// Yields some bytes, then fails
    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "client went away",
                )));
            }
            self.sent = true;
            buf.put_slice(b"partial upload");
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_stage_hashes_and_writes() {
        let (staging, _temp) = create_test_staging().await;

        let data = vec![7u8; 50_000];
        let staged = staging.stage(&data[..]).await.unwrap();

        assert_eq!(*staged.hash(), ContentHash::from_bytes(&data));
        assert_eq!(staged.size(), 50_000);
        assert_eq!(fs::read(staged.path()).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_stage_empty_stream() {
        let (staging, _temp) = create_test_staging().await;

        let staged = staging.stage(&b""[..]).await.unwrap();
        assert_eq!(*staged.hash(), ContentHash::from_bytes(b""));
        assert_eq!(staged.size(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_leaves_nothing_behind() {
        let (staging, _temp) = create_test_staging().await;

        let result = staging.stage(FailingReader { sent: false }).await;
        match result {
            Err(crate::error::StorageError::Io { path, .. }) => {
                assert!(path.starts_with(staging.path()))
            }
            other => panic!("expected Io error, got {:?}", other),
        }
        assert_eq!(entry_count(staging.path()).await, 0);
    }

    #[tokio::test]
    async fn test_discard_is_idempotent() {
        let (staging, _temp) = create_test_staging().await;

        let staged = staging.stage(&b"throwaway"[..]).await.unwrap();
        let path = staged.path().to_path_buf();
        fs::remove_file(&path).await.unwrap();

        staged.discard().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_uncommitted() {
        let (staging, _temp) = create_test_staging().await;

        let staged = staging.stage(&b"dropped"[..]).await.unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_clear_removes_leftovers() {
        let (staging, _temp) = create_test_staging().await;

        fs::write(staging.path().join("crashed-upload"), b"junk")
            .await
            .unwrap();
        fs::create_dir(staging.path().join("odd-dir")).await.unwrap();

        assert_eq!(staging.clear().await.unwrap(), 2);
        assert_eq!(entry_count(staging.path()).await, 0);
    }

    #[tokio::test]
    async fn test_parallel_staging() {
        let (staging, _temp) = create_test_staging().await;

        let (a, b, c) = tokio::join!(
            staging.stage(&b"one"[..]),
            staging.stage(&b"two"[..]),
            staging.stage(&b"one"[..]),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert_ne!(a.path(), c.path());
        assert_eq!(a.hash(), c.hash());
        assert_ne!(a.hash(), b.hash());
        assert_eq!(entry_count(staging.path()).await, 3);
    }
}
