//! Data catalog connector speaking the Iceberg REST catalog protocol.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::rest::RestConnector;
use super::types::{ConnectorResult, ConnectorStatus, ConnectorType};
use super::Connector;
use crate::config::ConnectorConfig;
use crate::error::ConnectorError;

const CAPABILITIES: &[&str] = &[
    "list_namespaces",
    "list_tables",
    "get_table_schema",
    "get_table_metadata",
];

/// Iceberg joins multi-level namespaces with the unit separator (0x1F).
const NAMESPACE_SEPARATOR: &str = "%1F";

pub struct CatalogConnector {
    rest: RestConnector,
    prefix: Option<String>,
}

impl CatalogConnector {
    pub fn new(name: &str, config: ConnectorConfig) -> Self {
        let prefix = config
            .prefix
            .clone()
            .filter(|p| !p.trim_matches('/').is_empty());
        Self {
            rest: RestConnector::new(name, config),
            prefix,
        }
    }

    fn base_path(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("/v1/{}", prefix.trim_matches('/')),
            None => "/v1".to_string(),
        }
    }

    fn namespace_path(namespace: &str) -> String {
        namespace.split('.').collect::<Vec<_>>().join(NAMESPACE_SEPARATOR)
    }

    pub async fn list_namespaces(
        &self,
        parent: Option<&str>,
    ) -> Result<ConnectorResult, ConnectorError> {
        let query = parent
            .filter(|p| !p.is_empty())
            .map(|p| vec![("parent".to_string(), p.to_string())])
            .unwrap_or_default();
        let result = self
            .rest
            .get_with_query(&format!("{}/namespaces", self.base_path()), query)
            .await?;
        if !result.success {
            return Ok(result);
        }

        let names: Vec<String> = result
            .data
            .as_ref()
            .and_then(|d| d.get("namespaces"))
            .and_then(Value::as_array)
            .map(|list| list.iter().map(flatten_namespace).collect())
            .unwrap_or_default();
        Ok(single_column("namespace", names))
    }

    pub async fn list_tables(&self, namespace: &str) -> Result<ConnectorResult, ConnectorError> {
        let path = format!(
            "{}/namespaces/{}/tables",
            self.base_path(),
            Self::namespace_path(namespace)
        );
        let result = self.rest.get(&path).await?;
        if !result.success {
            return Ok(result);
        }

        let names: Vec<String> = result
            .data
            .as_ref()
            .and_then(|d| d.get("identifiers"))
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(single_column("table_name", names))
    }

    pub async fn get_table_metadata(
        &self,
        namespace: &str,
        table: &str,
    ) -> Result<ConnectorResult, ConnectorError> {
        let path = format!(
            "{}/namespaces/{}/tables/{}",
            self.base_path(),
            Self::namespace_path(namespace),
            table
        );
        self.rest.get(&path).await
    }

    /// Columns of the table's current schema as `name | type | required | doc`.
    pub async fn get_table_schema(
        &self,
        namespace: &str,
        table: &str,
    ) -> Result<ConnectorResult, ConnectorError> {
        let result = self.get_table_metadata(namespace, table).await?;
        if !result.success {
            return Ok(result);
        }
        let metadata = result
            .data
            .as_ref()
            .and_then(|d| d.get("metadata"))
            .cloned()
            .unwrap_or(Value::Null);
        let fields = current_schema(&metadata)
            .and_then(|s| s.get("fields"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let rows = fields
            .iter()
            .map(|f| {
                vec![
                    f.get("name").cloned().unwrap_or(Value::Null),
                    f.get("type").cloned().unwrap_or(Value::Null),
                    f.get("required").cloned().unwrap_or(json!(false)),
                    f.get("doc").cloned().unwrap_or(json!("")),
                ]
            })
            .collect();
        Ok(ConnectorResult::table(
            vec![
                "name".into(),
                "type".into(),
                "required".into(),
                "doc".into(),
            ],
            rows,
        ))
    }

    fn failed(&self, message: String) -> ConnectorError {
        ConnectorError::Failed(self.rest.name().to_string(), message)
    }
}

/// `["a","b"]` → `"a.b"`.
fn flatten_namespace(ns: &Value) -> String {
    match ns {
        Value::Array(parts) => parts
            .iter()
            .map(|p| p.as_str().map(str::to_string).unwrap_or_else(|| p.to_string()))
            .collect::<Vec<_>>()
            .join("."),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve `current-schema-id` against `schemas`, falling back to the legacy
/// single `schema` field.
fn current_schema(metadata: &Value) -> Option<&Value> {
    if let Some(schema) = metadata.get("current-schema") {
        return Some(schema);
    }
    if let (Some(id), Some(schemas)) = (
        metadata.get("current-schema-id"),
        metadata.get("schemas").and_then(Value::as_array),
    ) {
        if let Some(s) = schemas.iter().find(|s| s.get("schema-id") == Some(id)) {
            return Some(s);
        }
    }
    metadata.get("schema")
}

fn single_column(column: &str, values: Vec<String>) -> ConnectorResult {
    let rows = values.iter().map(|v| vec![json!(v)]).collect();
    let mut result = ConnectorResult::table(vec![column.to_string()], rows);
    result.data = Some(json!(values));
    result
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing required parameter '{}'", key))
}

#[async_trait]
impl Connector for CatalogConnector {
    fn name(&self) -> &str {
        self.rest.name()
    }

    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Catalog
    }

    fn capabilities(&self) -> Vec<String> {
        CAPABILITIES.iter().map(|s| s.to_string()).collect()
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        self.rest.connect().await
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.rest.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.rest.is_connected()
    }

    async fn health_check(&self) -> ConnectorStatus {
        self.rest.health_check().await
    }

    async fn execute(
        &self,
        operation: &str,
        params: Value,
    ) -> Result<ConnectorResult, ConnectorError> {
        match operation {
            "list_namespaces" => {
                self.list_namespaces(params.get("parent").and_then(Value::as_str))
                    .await
            }
            "list_tables" => {
                let namespace = required_str(&params, "namespace").map_err(|e| self.failed(e))?;
                self.list_tables(namespace).await
            }
            "get_table_schema" | "get_table_metadata" => {
                let namespace = required_str(&params, "namespace").map_err(|e| self.failed(e))?;
                let table = required_str(&params, "table").map_err(|e| self.failed(e))?;
                if operation == "get_table_schema" {
                    self.get_table_schema(namespace, table).await
                } else {
                    self.get_table_metadata(namespace, table).await
                }
            }
            other => Err(ConnectorError::UnsupportedOperation {
                connector: self.name().to_string(),
                operation: other.to_string(),
                supported: CAPABILITIES.join(", "),
            }),
        }
    }
}
