//! Persistent key/value memory.
//!
//! Facts the assistant should remember across conversations ("user:name",
//! "preferred_warehouse", ...). Stored in SQLite behind the same pooled,
//! WAL-mode connections as the session store.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, OptionalExtension};

use crate::error::{DatabotError, Result};
use crate::utils::sqlite::{self, PoolConfig, PooledConnection, SqlitePool};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memory (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
";

fn memory_err(e: rusqlite::Error) -> DatabotError {
    DatabotError::Memory(e.to_string())
}

fn pool_err(e: r2d2::Error) -> DatabotError {
    DatabotError::Memory(format!("connection pool: {}", e))
}

pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pool = sqlite::file_pool(path, &PoolConfig::default()).map_err(pool_err)?;
        Self::init(pool)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(sqlite::memory_pool(&PoolConfig::default()).map_err(pool_err)?)
    }

    fn init(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.conn()?.execute_batch(SCHEMA).map_err(memory_err)?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection> {
        self.pool.get().map_err(pool_err)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT value FROM memory WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(memory_err)
    }

    /// Insert or overwrite `key`.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(DatabotError::Memory("key must not be empty".into()));
        }
        self.conn()?
            .execute(
                "INSERT INTO memory (key, value, updated_at)
                 VALUES (?1, ?2, CURRENT_TIMESTAMP)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = CURRENT_TIMESTAMP",
                params![key, value],
            )
            .map_err(memory_err)?;
        Ok(())
    }

    /// Remove `key`. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let n = self
            .conn()?
            .execute("DELETE FROM memory WHERE key = ?1", params![key])
            .map_err(memory_err)?;
        Ok(n > 0)
    }

    /// Every fact, ordered by key.
    pub fn all(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM memory ORDER BY key")
            .map_err(memory_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(memory_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(memory_err)?);
        }
        Ok(out)
    }

    pub fn clear(&self) -> Result<usize> {
        self.conn()?
            .execute("DELETE FROM memory", [])
            .map_err(memory_err)
    }

    pub fn len(&self) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM memory", [], |row| row.get(0))
            .map_err(memory_err)?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Run `f` against `store` on the blocking pool.
pub async fn blocking<F, R>(store: &Arc<MemoryStore>, f: F) -> Result<R>
where
    F: FnOnce(&MemoryStore) -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| DatabotError::Memory(format!("memory task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_get_overwrite() {
        let store = MemoryStore::open_in_memory().unwrap();
        assert!(store.get("user:name").unwrap().is_none());
        store.set("user:name", "Ada").unwrap();
        store.set("user:name", "Grace").unwrap();
        assert_eq!(store.get("user:name").unwrap().as_deref(), Some("Grace"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = MemoryStore::open_in_memory().unwrap();
        let err = store.set("  ", "x").unwrap_err();
        assert!(matches!(err, DatabotError::Memory(_)));
    }

    #[test]
    fn test_all_is_sorted_by_key() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.set("zeta", "1").unwrap();
        store.set("alpha", "2").unwrap();
        let keys: Vec<String> = store.all().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_delete_and_clear() {
        let store = MemoryStore::open_in_memory().unwrap();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.db");
        MemoryStore::open(&path).unwrap().set("k", "v").unwrap();
        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }
}
