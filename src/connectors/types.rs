//! Connector types: categories, health status, results and descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default number of rows rendered by [`ConnectorResult::to_markdown_table`].
pub const DEFAULT_TABLE_ROWS: usize = 100;

/// Category of external system a connector talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Sql,
    RestApi,
    Catalog,
    Streaming,
    Processing,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::RestApi => "rest_api",
            Self::Catalog => "catalog",
            Self::Streaming => "streaming",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = String;

    /// Parses config `type` strings; `kafka` and `spark` are accepted as
    /// aliases for `streaming` and `processing`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sql" => Ok(Self::Sql),
            "rest_api" | "rest" => Ok(Self::RestApi),
            "catalog" => Ok(Self::Catalog),
            "streaming" | "kafka" => Ok(Self::Streaming),
            "processing" | "spark" => Ok(Self::Processing),
            other => Err(format!(
                "unknown connector type '{}'. Supported: sql, rest_api, catalog, streaming (kafka), processing (spark)",
                other
            )),
        }
    }
}

/// Health of a connector as seen by the last probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    Healthy,
    Degraded,
    Unreachable,
    NotConfigured,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unreachable => "unreachable",
            Self::NotConfigured => "not_configured",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform result of a connector operation: tabular rows, a scalar/JSON
/// payload, or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rows: Option<Vec<Vec<Value>>>,
    /// Total rows reported by the source (may exceed `rows.len()`)
    #[serde(default)]
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub metadata: Map<String, Value>,
}

impl Default for ConnectorResult {
    fn default() -> Self {
        Self {
            success: true,
            data: None,
            columns: None,
            rows: None,
            row_count: 0,
            error: None,
            metadata: Map::new(),
        }
    }
}

impl ConnectorResult {
    /// Successful result carrying a JSON payload.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Successful tabular result.
    pub fn table(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len();
        Self {
            columns: Some(columns),
            rows: Some(rows),
            row_count,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Render for the model.
    ///
    /// Tabular results become a markdown table of at most `max_rows` rows with
    /// `NULL` for null cells; other results fall back to the payload.
    pub fn to_markdown_table(&self, max_rows: usize) -> String {
        let (columns, rows) = match (&self.columns, &self.rows) {
            (Some(c), Some(r)) if !c.is_empty() && !r.is_empty() => (c, r),
            _ => {
                return match &self.data {
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => "No data returned.".to_string(),
                };
            }
        };

        let mut lines = Vec::with_capacity(rows.len().min(max_rows) + 3);
        lines.push(format!("| {} |", columns.join(" | ")));
        lines.push(format!(
            "| {} |",
            columns.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
        ));
        for row in rows.iter().take(max_rows) {
            let cells: Vec<String> = row.iter().map(render_cell).collect();
            lines.push(format!("| {} |", cells.join(" | ")));
        }

        let total = rows.len();
        if total > max_rows {
            lines.push(format!("\n*Showing {} of {} rows.*", max_rows, total));
        } else if self.row_count > total {
            lines.push(format!(
                "\n*Showing {} of {} total rows.*",
                total, self.row_count
            ));
        }
        lines.join("\n")
    }

    /// Text handed back to the model as a tool result.
    pub fn to_tool_output(&self) -> String {
        if self.success {
            self.to_markdown_table(DEFAULT_TABLE_ROWS)
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("operation failed")
            )
        }
    }
}

fn render_cell(v: &Value) -> String {
    match v {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Public description of a registered connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    pub connected: bool,
    pub capabilities: Vec<String>,
    /// Cached health; `None` when no health check is younger than the TTL
    #[serde(default)]
    pub status: Option<ConnectorStatus>,
}
