// Storage error taxonomy
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the storage engine and its components
#[derive(Debug, Error)]
pub enum StorageError {
    /// Lookup miss for a record or a blob
    #[error("requested record was not found: {0}")]
    NotFound(String),

    /// The name is already registered by a live record
    #[error("duplicate name used when saving file: {0}")]
    DuplicateName(String),

    /// Disk or stream failure during staging, commit, open or removal
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An invariant the engine guarantees was found violated
    #[error("storage consistency error: {0}")]
    Consistency(String),

    /// Metadata index failure
    #[error("metadata database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// HTTP-equivalent status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            StorageError::NotFound(_) => 404,
            StorageError::DuplicateName(_) => 400,
            _ => 500,
        }
    }
}

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Attach the path being worked on to an I/O failure
pub trait IoResultExt<T> {
    fn at_path(self, path: &Path) -> StorageResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path(self, path: &Path) -> StorageResult<T> {
        self.map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(StorageError::NotFound("a".into()).status_code(), 404);
        assert_eq!(StorageError::DuplicateName("a".into()).status_code(), 400);
        assert_eq!(StorageError::Consistency("a".into()).status_code(), 500);

        let io: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        assert_eq!(io.at_path(Path::new("/data")).unwrap_err().status_code(), 500);
        assert_eq!(StorageError::from(sqlx::Error::RowNotFound).status_code(), 500);
    }

    #[test]
    fn test_messages_carry_context() {
        let err = StorageError::DuplicateName("report.pdf".into());
        assert!(err.to_string().contains("report.pdf"));

        let io: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        ));
        let message = io.at_path(Path::new("/data/files/ab")).unwrap_err().to_string();
        assert!(message.contains("/data/files/ab"));
        assert!(message.contains("read-only volume"));
    }
}
