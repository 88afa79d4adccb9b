//! Secondary tier: SQLite-backed record store.
//!
//! Slower to open than the primary tier but effectively unbounded; it
//! absorbs the records the primary quota rejects. All calls are synchronous
//! point operations on a local database file and run inline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use tracing::{debug, warn};

use super::backend::{BackendKind, Result, StorageBackend, StoreError};
use super::record::StoredRecord;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    key        TEXT PRIMARY KEY,
    data       BLOB NOT NULL,
    timestamp  TEXT NOT NULL
);
";

/// SQLite-backed secondary store.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!("Secondary store opened at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn put(&self, record: &StoredRecord) -> Result<()> {
        let data = serde_json::to_vec(&record.data)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO records (key, data, timestamp) VALUES (?1, ?2, ?3)",
            params![record.key, data, record.timestamp.to_rfc3339()],
        )?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT data, timestamp FROM records WHERE key = ?1",
                params![key],
                |row| {
                    let data: Vec<u8> = row.get(0)?;
                    let timestamp: String = row.get(1)?;
                    Ok((data, timestamp))
                },
            )
            .optional()?;

        let Some((data, timestamp)) = row else {
            return Ok(None);
        };

        let data = serde_json::from_slice(&data)?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| StoreError::Corrupt(format!("{key}: bad timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(StoredRecord {
            key: key.to_string(),
            data,
            timestamp,
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        warn!("Clearing secondary record store");
        let conn = self.conn.lock();
        conn.execute("DELETE FROM records", [])?;
        Ok(())
    }

    async fn usage_bytes(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let bytes: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(bytes.max(0) as u64)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Secondary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SqliteBackend::open(&temp_dir.path().join("records.db")).unwrap();

        let record = StoredRecord::new("layout", json!({"columns": 3}));
        backend.put(&record).await.unwrap();

        let loaded = backend.get("layout").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(backend.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_previous_value() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SqliteBackend::open(&temp_dir.path().join("records.db")).unwrap();

        backend
            .put(&StoredRecord::new("slot", json!("first")))
            .await
            .unwrap();
        backend
            .put(&StoredRecord::new("slot", json!("second")))
            .await
            .unwrap();

        let loaded = backend.get("slot").await.unwrap().unwrap();
        assert_eq!(loaded.data, json!("second"));
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("records.db");

        let backend = SqliteBackend::open(&db_path).unwrap();
        backend
            .put(&StoredRecord::new("kept", json!({"n": 7})))
            .await
            .unwrap();
        drop(backend);

        let reopened = SqliteBackend::open(&db_path).unwrap();
        let loaded = reopened.get("kept").await.unwrap().unwrap();
        assert_eq!(loaded.data, json!({"n": 7}));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SqliteBackend::open(&temp_dir.path().join("records.db")).unwrap();

        backend
            .put(&StoredRecord::new("a", json!(1)))
            .await
            .unwrap();
        backend
            .put(&StoredRecord::new("b", json!(2)))
            .await
            .unwrap();

        backend.delete("a").await.unwrap();
        assert!(backend.get("a").await.unwrap().is_none());
        assert!(backend.get("b").await.unwrap().is_some());

        // Deleting an absent key is fine.
        backend.delete("a").await.unwrap();

        backend.clear().await.unwrap();
        assert!(backend.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_usage_is_nonzero_after_writes() {
        let temp_dir = TempDir::new().unwrap();
        let backend = SqliteBackend::open(&temp_dir.path().join("records.db")).unwrap();

        backend
            .put(&StoredRecord::new("x", json!("y")))
            .await
            .unwrap();

        assert!(backend.usage_bytes().await.unwrap() > 0);
    }
}
