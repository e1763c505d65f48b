//! Persistent memory tool.
//!
//! Lets the model read and write the facts that the context builder injects
//! under `## Persistent Memory`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{DatabotError, Result};
use crate::memory::{self, MemoryStore};

use super::{Tool, ToolContext};

pub struct MemoryTool {
    store: Arc<MemoryStore>,
}

impl MemoryTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

fn required(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DatabotError::Tool(format!("missing required parameter '{}'", key)))
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Remember facts across conversations. Actions: get, set, delete, list."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["get", "set", "delete", "list"]
                },
                "key": {"type": "string"},
                "value": {"type": "string"}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let action = required(&args, "action")?;
        match action.as_str() {
            "get" => {
                let key = required(&args, "key")?;
                let value = {
                    let key = key.clone();
                    memory::blocking(&self.store, move |s| s.get(&key)).await?
                };
                Ok(value.unwrap_or_else(|| format!("No memory stored for '{}'.", key)))
            }
            "set" => {
                let key = required(&args, "key")?;
                let value = required(&args, "value")?;
                let k = key.clone();
                memory::blocking(&self.store, move |s| s.set(&k, &value)).await?;
                Ok(format!("Remembered '{}'.", key))
            }
            "delete" => {
                let key = required(&args, "key")?;
                let k = key.clone();
                let existed = memory::blocking(&self.store, move |s| s.delete(&k)).await?;
                Ok(if existed {
                    format!("Forgot '{}'.", key)
                } else {
                    format!("No memory stored for '{}'.", key)
                })
            }
            "list" => {
                let all = memory::blocking(&self.store, |s| s.all()).await?;
                if all.is_empty() {
                    return Ok("Memory is empty.".to_string());
                }
                Ok(all
                    .iter()
                    .map(|(k, v)| format!("- {}: {}", k, v))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            other => Err(DatabotError::Tool(format!("unknown action '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> (MemoryTool, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        (MemoryTool::new(Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (tool, store) = tool();
        let ctx = ToolContext::new();
        let out = tool
            .execute(json!({"action": "set", "key": "team", "value": "data-eng"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "Remembered 'team'.");
        assert_eq!(store.get("team").unwrap().as_deref(), Some("data-eng"));

        let out = tool
            .execute(json!({"action": "get", "key": "team"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "data-eng");
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (tool, store) = tool();
        let ctx = ToolContext::new();
        assert_eq!(
            tool.execute(json!({"action": "list"}), &ctx).await.unwrap(),
            "Memory is empty."
        );
        store.set("b", "2").unwrap();
        store.set("a", "1").unwrap();
        assert_eq!(
            tool.execute(json!({"action": "list"}), &ctx).await.unwrap(),
            "- a: 1\n- b: 2"
        );
        assert_eq!(
            tool.execute(json!({"action": "delete", "key": "a"}), &ctx)
                .await
                .unwrap(),
            "Forgot 'a'."
        );
        assert_eq!(
            tool.execute(json!({"action": "get", "key": "a"}), &ctx)
                .await
                .unwrap(),
            "No memory stored for 'a'."
        );
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let (tool, _) = tool();
        let ctx = ToolContext::new();
        assert!(tool.execute(json!({"action": "set", "key": "k"}), &ctx).await.is_err());
        assert!(tool.execute(json!({"action": "explode"}), &ctx).await.is_err());
        assert!(tool.execute(json!({}), &ctx).await.is_err());
    }
}
