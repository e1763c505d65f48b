//! SQLite-backed durable session store.
//!
//! Connections come from an r2d2 pool in WAL mode, so lookups run alongside
//! a writer instead of queueing behind it. A checkout that cannot get a
//! connection within the pool's acquire timeout fails with a `SessionStore`
//! error rather than waiting forever.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::types::{Message, Session, SessionMeta};
use crate::error::{DatabotError, Result};
use crate::utils::sqlite::{self, PoolConfig, PooledConnection, SqlitePool};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    key         TEXT PRIMARY KEY,
    history     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
";

fn store_err(e: rusqlite::Error) -> DatabotError {
    DatabotError::SessionStore(e.to_string())
}

fn pool_err(e: r2d2::Error) -> DatabotError {
    DatabotError::SessionStore(format!("connection pool: {}", e))
}

/// Durable storage for sessions that are not resident in memory.
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &PoolConfig::default())
    }

    pub fn open_with(path: &Path, config: &PoolConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(sqlite::file_pool(path, config).map_err(pool_err)?)
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(&PoolConfig::default())
    }

    pub fn open_in_memory_with(config: &PoolConfig) -> Result<Self> {
        Self::init(sqlite::memory_pool(config).map_err(pool_err)?)
    }

    fn init(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.conn()?.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(store)
    }

    /// Check a connection out of the pool.
    pub fn conn(&self) -> Result<PooledConnection> {
        self.pool.get().map_err(pool_err)
    }

    /// Load a session; `max_messages` bounds the restored history.
    pub fn load(&self, key: &str, max_messages: usize) -> Result<Option<Session>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT history, created_at, updated_at FROM sessions WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(store_err)?;

        let Some((history, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let messages: Vec<Message> = serde_json::from_str(&history)?;
        let mut session = Session::with_max_messages(key, max_messages);
        session.messages = messages;
        session.trim();
        session.created_at = parse_ts(&created_at)?;
        session.updated_at = parse_ts(&updated_at)?;
        Ok(Some(session))
    }

    /// Insert or replace the durable copy of `session`.
    pub fn save(&self, session: &Session) -> Result<()> {
        let history = serde_json::to_string(&session.messages)?;
        self.conn()?
            .execute(
                "INSERT INTO sessions (key, history, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    history = excluded.history,
                    updated_at = excluded.updated_at",
                params![
                    session.chat_id,
                    history,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Delete the durable copy. Returns whether a row existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let n = self
            .conn()?
            .execute("DELETE FROM sessions WHERE key = ?1", params![key])
            .map_err(store_err)?;
        Ok(n > 0)
    }

    /// All stored sessions, most recently updated first.
    pub fn list(&self) -> Result<Vec<SessionMeta>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT key, history, created_at, updated_at FROM sessions
                 ORDER BY updated_at DESC",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(store_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (key, history, created_at, updated_at) = row.map_err(store_err)?;
            out.push(meta_from_row(key, &history, &created_at, &updated_at)?);
        }
        Ok(out)
    }

    /// Metadata for one stored session.
    pub fn metadata(&self, key: &str) -> Result<Option<SessionMeta>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT history, created_at, updated_at FROM sessions WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(store_err)?;
        row.map(|(history, c, u)| meta_from_row(key.to_string(), &history, &c, &u))
            .transpose()
    }
}

fn meta_from_row(
    key: String,
    history: &str,
    created_at: &str,
    updated_at: &str,
) -> Result<SessionMeta> {
    let messages: Vec<serde_json::Value> = serde_json::from_str(history)?;
    Ok(SessionMeta {
        key,
        created_at: parse_ts(created_at)?,
        updated_at: parse_ts(updated_at)?,
        message_count: messages.len(),
    })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabotError::SessionStore(format!("bad timestamp '{}': {}", raw, e)))
}
