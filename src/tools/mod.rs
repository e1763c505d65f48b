//! Tools module - Tool definitions and execution for LLM function calling
//!
//! - `Tool` trait: The interface that all tools must implement
//! - `ToolContext`: Execution context (channel, chat_id)
//! - `ToolRegistry`: Lookup, definitions, and timeout-bounded execution
//!
//! # Built-in Tools
//!
//! - `ConnectorTool`: runs operations on registered data connectors
//! - `MemoryTool`: reads and writes persistent memory
//! - `EchoTool`: echoes its input, for testing
//!
//! # Example
//!
//! ```rust
//! use databot::tools::{ToolRegistry, EchoTool};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut registry = ToolRegistry::new();
//! registry.register(Box::new(EchoTool));
//!
//! let result = registry.execute("echo", json!({"message": "Hello!"})).await;
//! assert_eq!(result, "Hello!");
//! assert_eq!(registry.definitions().len(), 1);
//! # });
//! ```

pub mod connector;
pub mod memory;
mod registry;
mod types;

pub use connector::ConnectorTool;
pub use memory::MemoryTool;
pub use registry::{run_tool, unknown_tool, ToolRegistry, DEFAULT_TOOL_TIMEOUT};
pub use types::{Tool, ToolContext};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Echoes back the `message` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the provided message"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");
        Ok(message.to_string())
    }
}
