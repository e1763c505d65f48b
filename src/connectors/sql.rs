//! SQL connector.
//!
//! Ad-hoc queries, table listing and column schemas over a relational
//! database. SQLite is served in-process through the pooled connections in
//! [`crate::utils::sqlite`]; other drivers need an external client and are
//! refused at construction.
//!
//! In read-only mode (the default) every statement is prepared first and
//! rejected unless SQLite reports it as read-only, which also covers CTEs
//! that wrap writes. Multiple statements in one call are refused by the
//! driver.

use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Params, Statement};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::types::{ConnectorResult, ConnectorStatus, ConnectorType};
use super::Connector;
use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::utils::sqlite::{self, PoolConfig, SqlitePool};

const READ_CAPABILITIES: &[&str] = &["query", "list_databases", "list_tables", "get_schema"];

const LIST_DATABASES: &str = "SELECT name, file FROM pragma_database_list ORDER BY seq";

const LIST_TABLES: &str = "SELECT name, type FROM sqlite_master
     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
     ORDER BY name";

const TABLE_SCHEMA: &str = "SELECT name AS column_name,
            type AS data_type,
            CASE \"notnull\" WHEN 1 THEN 'NO' ELSE 'YES' END AS is_nullable,
            dflt_value AS column_default,
            pk AS primary_key
     FROM pragma_table_info(?1)
     ORDER BY cid";

pub struct SqlConnector {
    name: String,
    config: ConnectorConfig,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqlConnector {
    /// Fails for drivers without a built-in client.
    pub fn new(name: &str, config: ConnectorConfig) -> Result<Self, ConnectorError> {
        if !config.driver.eq_ignore_ascii_case("sqlite") {
            return Err(ConnectorError::NotConfigured(
                name.to_string(),
                format!(
                    "this build has no built-in SQL driver for '{}' (supported: sqlite)",
                    config.driver
                ),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            config,
            pool: RwLock::new(None),
        })
    }

    fn database_path(&self) -> Option<PathBuf> {
        self.config
            .database
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    }

    fn pool(&self) -> Result<SqlitePool, ConnectorError> {
        self.pool
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| ConnectorError::Unreachable(self.name.clone(), "not connected".into()))
    }

    /// Run `f` with a pooled connection on the blocking pool. SQL errors
    /// come back as a failed result.
    async fn with_conn<F>(&self, f: F) -> Result<ConnectorResult, ConnectorError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<ConnectorResult> + Send + 'static,
    {
        let pool = self.pool()?;
        let outcome = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            f(&conn).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| ConnectorError::Failed(self.name.clone(), format!("query task failed: {}", e)))?;

        Ok(outcome.unwrap_or_else(|e| {
            warn!(connector = %self.name, error = %e, "SQL error");
            ConnectorResult::failure(format!("SQL error: {}", e))
        }))
    }

    /// Run a query, returning at most `max_rows` rows (0 = no limit).
    pub async fn query(&self, sql: &str, max_rows: usize) -> Result<ConnectorResult, ConnectorError> {
        let sql = sql.to_string();
        let read_only = self.config.read_only;
        debug!(connector = %self.name, read_only, "Running SQL query");
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            if read_only && !stmt.readonly() {
                return Ok(ConnectorResult::failure(
                    "Write operations are blocked (read_only=true).",
                ));
            }
            collect_rows(&mut stmt, [], max_rows)
        })
        .await
    }

    /// Run a modifying statement. Refused in read-only mode.
    pub async fn execute_write(&self, sql: &str) -> Result<ConnectorResult, ConnectorError> {
        if self.config.read_only {
            return Ok(ConnectorResult::failure(
                "Write operations disabled (read_only=true).",
            ));
        }
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            collect_rows(&mut stmt, [], 0)
        })
        .await
    }

    pub async fn list_databases(&self) -> Result<ConnectorResult, ConnectorError> {
        let max_rows = self.config.max_rows;
        self.with_conn(move |conn| collect_rows(&mut conn.prepare(LIST_DATABASES)?, [], max_rows))
            .await
    }

    pub async fn list_tables(&self) -> Result<ConnectorResult, ConnectorError> {
        let max_rows = self.config.max_rows;
        self.with_conn(move |conn| collect_rows(&mut conn.prepare(LIST_TABLES)?, [], max_rows))
            .await
    }

    /// Column definitions of `table`.
    pub async fn get_schema(&self, table: &str) -> Result<ConnectorResult, ConnectorError> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let result = collect_rows(&mut conn.prepare(TABLE_SCHEMA)?, [table.as_str()], 0)?;
            if result.row_count == 0 {
                return Ok(ConnectorResult::failure(format!(
                    "Table '{}' not found",
                    table
                )));
            }
            Ok(result)
        })
        .await
    }

    fn required_str<'a>(&self, params: &'a Value, key: &str) -> Result<&'a str, ConnectorError> {
        params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                ConnectorError::Failed(self.name.clone(), format!("missing '{}' parameter", key))
            })
    }
}

/// Read every row, keeping the first `max_rows` (0 = all). Statements that
/// return no columns are executed and report the affected row count.
fn collect_rows<P: Params>(
    stmt: &mut Statement<'_>,
    params: P,
    max_rows: usize,
) -> rusqlite::Result<ConnectorResult> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    if columns.is_empty() {
        let affected = stmt.execute(params)?;
        return Ok(ConnectorResult::data(json!(format!(
            "Rows affected: {}",
            affected
        ))));
    }

    let mut rows = stmt.query(params)?;
    let mut kept = Vec::new();
    let mut total = 0usize;
    while let Some(row) = rows.next()? {
        total += 1;
        if max_rows == 0 || kept.len() < max_rows {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(to_json))
                .collect::<rusqlite::Result<Vec<Value>>>()?;
            kept.push(values);
        }
    }

    let mut result = ConnectorResult::table(columns, kept);
    result.row_count = total;
    Ok(result)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

#[async_trait]
impl Connector for SqlConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Sql
    }

    fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = READ_CAPABILITIES.iter().map(|s| s.to_string()).collect();
        if !self.config.read_only {
            caps.push("execute_write".to_string());
        }
        caps
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        let path = self.database_path().ok_or_else(|| {
            ConnectorError::NotConfigured(self.name.clone(), "no database path configured".into())
        })?;
        let config = PoolConfig {
            pool_size: 4,
            wal: false,
            ..PoolConfig::default()
        };
        let opened = tokio::task::spawn_blocking(move || sqlite::file_pool(&path, &config))
            .await
            .map_err(|e| ConnectorError::Failed(self.name.clone(), e.to_string()))?;
        let pool =
            opened.map_err(|e| ConnectorError::Unreachable(self.name.clone(), e.to_string()))?;

        *self
            .pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(pool);
        info!(connector = %self.name, read_only = self.config.read_only, "SQL connector opened");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    async fn health_check(&self) -> ConnectorStatus {
        if self.database_path().is_none() {
            return ConnectorStatus::NotConfigured;
        }
        match self.query("SELECT 1", 1).await {
            Ok(result) if result.success => ConnectorStatus::Healthy,
            Ok(_) => ConnectorStatus::Degraded,
            Err(_) => ConnectorStatus::Unreachable,
        }
    }

    async fn execute(
        &self,
        operation: &str,
        params: Value,
    ) -> Result<ConnectorResult, ConnectorError> {
        match operation {
            "query" => {
                let sql = params
                    .get("query")
                    .or_else(|| params.get("sql"))
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| {
                        ConnectorError::Failed(self.name.clone(), "missing 'query' parameter".into())
                    })?;
                let max_rows = params
                    .get("max_rows")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(self.config.max_rows);
                self.query(sql, max_rows).await
            }
            "execute_write" => self.execute_write(self.required_str(&params, "query")?).await,
            "list_databases" => self.list_databases().await,
            "list_tables" => self.list_tables().await,
            "get_schema" => self.get_schema(self.required_str(&params, "table")?).await,
            other => Err(ConnectorError::UnsupportedOperation {
                connector: self.name.clone(),
                operation: other.to_string(),
                supported: self.capabilities().join(", "),
            }),
        }
    }
}
