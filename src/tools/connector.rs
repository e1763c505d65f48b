//! Connector tool.
//!
//! The single path from the model to external data systems: it names a
//! connector and an operation, and the [`ConnectorRegistry`] does the rest.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::connectors::ConnectorRegistry;
use crate::error::{DatabotError, Result};

use super::{Tool, ToolContext};

pub struct ConnectorTool {
    registry: Arc<ConnectorRegistry>,
}

impl ConnectorTool {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self { registry }
    }

    fn list(&self) -> String {
        let descriptors = self.registry.descriptors();
        if descriptors.is_empty() {
            return "No connectors are configured.".to_string();
        }
        descriptors
            .iter()
            .map(|d| {
                format!(
                    "- {} ({}): {}",
                    d.name,
                    d.connector_type,
                    d.capabilities.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Tool for ConnectorTool {
    fn name(&self) -> &str {
        "connector"
    }

    fn description(&self) -> &str {
        "Run an operation on a configured data connector (databases, REST APIs, \
         catalogs). Call with operation 'list' and no connector to see what is \
         available."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "connector": {
                    "type": "string",
                    "description": "Name of the connector"
                },
                "operation": {
                    "type": "string",
                    "description": "Operation to run, e.g. 'get', 'list_tables'"
                },
                "params": {
                    "type": "object",
                    "description": "Operation parameters"
                }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let operation = args
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| DatabotError::Tool("missing required parameter 'operation'".into()))?;
        let connector = args.get("connector").and_then(Value::as_str);

        let connector = match connector {
            Some(name) if !name.is_empty() => name,
            _ if operation == "list" => return Ok(self.list()),
            _ => {
                return Err(DatabotError::Tool(
                    "missing required parameter 'connector'".into(),
                ))
            }
        };

        let params = args.get("params").cloned().unwrap_or_else(|| json!({}));
        match self.registry.execute(connector, operation, params).await {
            Ok(result) => Ok(result.to_tool_output()),
            Err(e) => Ok(format!("Error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::registry::tests::MockConnector;

    fn tool() -> ConnectorTool {
        let registry = Arc::new(ConnectorRegistry::new());
        registry.register(Arc::new(MockConnector::new("wh"))).unwrap();
        ConnectorTool::new(registry)
    }

    #[tokio::test]
    async fn test_dispatches_and_renders_table() {
        let out = tool()
            .execute(
                json!({"connector": "wh", "operation": "query"}),
                &ToolContext::new(),
            )
            .await
            .unwrap();
        assert!(out.starts_with("| n |"));
        assert!(out.contains("| 1 |"));
    }

    #[tokio::test]
    async fn test_passes_params_through() {
        let out = tool()
            .execute(
                json!({"connector": "wh", "operation": "echo", "params": {"x": 1}}),
                &ToolContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn test_registry_errors_become_text() {
        let t = tool();
        let out = t
            .execute(
                json!({"connector": "pg", "operation": "query"}),
                &ToolContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "Error: Connector 'pg' not found. Available: wh");

        let out = t
            .execute(
                json!({"connector": "wh", "operation": "drop"}),
                &ToolContext::new(),
            )
            .await
            .unwrap();
        assert!(out.contains("Supported: query, echo"));
    }

    #[tokio::test]
    async fn test_list_without_connector() {
        let out = tool()
            .execute(json!({"operation": "list"}), &ToolContext::new())
            .await
            .unwrap();
        assert_eq!(out, "- wh (sql): query, echo");
    }

    #[tokio::test]
    async fn test_missing_arguments() {
        let t = tool();
        assert!(t.execute(json!({}), &ToolContext::new()).await.is_err());
        assert!(t
            .execute(json!({"operation": "query"}), &ToolContext::new())
            .await
            .is_err());
    }
}
