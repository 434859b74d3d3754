// SQLite metadata index
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

use crate::error::{StorageError, StorageResult};
use crate::hash::ContentHash;
use crate::record::{FileId, FileRecord};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    content_hash BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS index_files_content_hash ON files (content_hash);
"#;

type RecordRow = (String, String, Vec<u8>);

/// Durable table of file records.
///
/// Names and ids are unique; the content hash column is indexed for the
/// reference counts the engine relies on.
pub struct MetadataDb {
    pool: SqlitePool,
}

impl MetadataDb {
    /// Create or open database at path
    pub async fn open(db_path: &Path) -> StorageResult<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    async fn migrate(&self) -> StorageResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Number of live records sharing this content hash
    pub async fn count_by_hash(&self, hash: &ContentHash) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE content_hash = ?")
            .bind(&hash.as_bytes()[..])
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn count_by_name(&self, name: &str) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Insert a record; a taken name maps to `DuplicateName`
    pub async fn insert(&self, record: &FileRecord) -> StorageResult<()> {
        let result = sqlx::query("INSERT INTO files (id, name, content_hash) VALUES (?, ?, ?)")
            .bind(record.id.to_string())
            .bind(&record.name)
            .bind(&record.content_hash.as_bytes()[..])
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StorageError::DuplicateName(record.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_by_id(&self, id: &FileId) -> StorageResult<FileRecord> {
        let row: Option<RecordRow> =
            sqlx::query_as("SELECT id, name, content_hash FROM files WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(decode_row)
            .unwrap_or_else(|| Err(StorageError::NotFound(format!("file id {}", id))))
    }

    pub async fn get_by_name(&self, name: &str) -> StorageResult<FileRecord> {
        let row: Option<RecordRow> =
            sqlx::query_as("SELECT id, name, content_hash FROM files WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(decode_row)
            .unwrap_or_else(|| Err(StorageError::NotFound(format!("file name {}", name))))
    }

    /// Delete a record by id; `NotFound` if no such record exists
    pub async fn delete_by_id(&self, id: &FileId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("file id {}", id)));
        }
        Ok(())
    }

    /// All records, ordered by name
    pub async fn list(&self) -> StorageResult<Vec<FileRecord>> {
        let rows: Vec<RecordRow> =
            sqlx::query_as("SELECT id, name, content_hash FROM files ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(decode_row).collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_row((id, name, digest): RecordRow) -> StorageResult<FileRecord> {
    let id = id
        .parse::<FileId>()
        .map_err(|e| StorageError::Consistency(format!("malformed id {:?} in index: {}", id, e)))?;

    let content_hash = ContentHash::from_digest(&digest).ok_or_else(|| {
        StorageError::Consistency(format!(
            "malformed content hash for {:?}: {} bytes",
            name,
            digest.len()
        ))
    })?;

    Ok(FileRecord {
        id,
        name,
        content_hash,
    })
}
