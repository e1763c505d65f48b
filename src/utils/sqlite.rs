//! Pooled SQLite connections for the session and memory stores and the SQL
//! connector.
//!
//! Every connection gets a busy timeout. Databases databot owns also run in
//! WAL mode, so readers proceed while a writer holds the database. Checkout
//! from the pool is bounded: when every connection is busy the caller gets an
//! error after `acquire_timeout`.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub type SqlitePool = Pool<SqliteConnectionManager>;

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Busy timeout applied to every connection, in milliseconds.
pub const BUSY_TIMEOUT_MS: u32 = 5_000;

#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum open connections for a file database (default: 8).
    pub pool_size: u32,
    /// How long a checkout waits for a free connection (default: 5s).
    pub acquire_timeout: Duration,
    pub busy_timeout_ms: u32,
    /// Switch the database to WAL. Off for databases databot does not own.
    pub wal: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout_ms: BUSY_TIMEOUT_MS,
            wal: true,
        }
    }
}

#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
    wal: bool,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!("PRAGMA busy_timeout = {};", self.busy_timeout_ms))?;
        if self.wal {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        }
        Ok(())
    }
}

/// File-backed pool. Parent directories must already exist.
pub fn file_pool(path: &Path, config: &PoolConfig) -> Result<SqlitePool, r2d2::Error> {
    build(SqliteConnectionManager::file(path), config.pool_size, config, true)
}

/// In-memory pool. Each in-memory connection is its own database, so the
/// pool holds exactly one and never recycles it.
pub fn memory_pool(config: &PoolConfig) -> Result<SqlitePool, r2d2::Error> {
    build(SqliteConnectionManager::memory(), 1, config, false)
}

fn build(
    manager: SqliteConnectionManager,
    max_size: u32,
    config: &PoolConfig,
    recycle: bool,
) -> Result<SqlitePool, r2d2::Error> {
    let builder = Pool::builder();
    let builder = if recycle {
        builder
    } else {
        builder.idle_timeout(None).max_lifetime(None)
    };
    builder
        .max_size(max_size.max(1))
        .connection_timeout(config.acquire_timeout)
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
            wal: config.wal,
        }))
        .build(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_pool_sets_pragmas() {
        let dir = TempDir::new().unwrap();
        let pool = file_pool(&dir.path().join("t.db"), &PoolConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        let busy: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert_eq!(busy, i64::from(BUSY_TIMEOUT_MS));
    }

    #[test]
    fn test_checkout_is_bounded() {
        let config = PoolConfig {
            acquire_timeout: Duration::from_millis(100),
            ..PoolConfig::default()
        };
        let pool = memory_pool(&config).unwrap();
        let _held = pool.get().unwrap();

        let started = std::time::Instant::now();
        assert!(pool.get().is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
