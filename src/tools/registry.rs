//! Tool registry for Databot
//!
//! This module provides the `ToolRegistry` struct for managing and executing tools.
//! Every execution is bounded by a timeout and every failure is folded into the
//! text result the model sees, so a broken tool never fails the turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::providers::ToolDefinition;

use super::{Tool, ToolContext};

/// Timeout applied to tools that do not override [`Tool::timeout`].
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// A registry that holds and manages tools.
///
/// # Example
///
/// ```rust
/// use databot::tools::{ToolRegistry, EchoTool};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let mut registry = ToolRegistry::new();
/// registry.register(Box::new(EchoTool));
/// assert!(registry.has("echo"));
///
/// let result = registry.execute("echo", json!({"message": "hello"})).await;
/// assert_eq!(result, "hello");
///
/// let missing = registry.execute("nope", json!({})).await;
/// assert_eq!(missing, "Error: Unknown tool 'nope'");
/// # });
/// ```
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "Replacing already registered tool");
        } else {
            info!(tool = %name, "Registering tool");
        }
        self.tools.insert(name, Arc::from(tool));
    }

    /// Shared handle to a tool; callers can drop any registry lock before running it.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions for the provider, sorted by tool name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.parameters()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute with an empty context and the default timeout.
    pub async fn execute(&self, name: &str, args: Value) -> String {
        self.execute_with_context(name, args, &ToolContext::default(), DEFAULT_TOOL_TIMEOUT)
            .await
    }

    /// Execute a tool by name. Unknown tools, timeouts and errors all come back
    /// as `Error...` text.
    pub async fn execute_with_context(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
        default_timeout: Duration,
    ) -> String {
        match self.get(name) {
            Some(tool) => run_tool(tool.as_ref(), args, ctx, default_timeout).await,
            None => unknown_tool(name),
        }
    }
}

/// Result text for a tool name nobody registered.
pub fn unknown_tool(name: &str) -> String {
    warn!(tool = name, "Model requested unknown tool");
    format!("Error: Unknown tool '{}'", name)
}

/// Run `tool` under its timeout (or `default_timeout`), folding failures into text.
///
/// On timeout the tool future is dropped, which cancels it.
pub async fn run_tool(
    tool: &dyn Tool,
    args: Value,
    ctx: &ToolContext,
    default_timeout: Duration,
) -> String {
    let name = tool.name();
    let limit = tool.timeout().unwrap_or(default_timeout);
    let start = Instant::now();

    match tokio::time::timeout(limit, tool.execute(args, ctx)).await {
        Ok(Ok(output)) => {
            info!(
                tool = name,
                duration_ms = start.elapsed().as_millis() as u64,
                "Tool executed successfully"
            );
            output
        }
        Ok(Err(e)) => {
            error!(
                tool = name,
                error = %e,
                duration_ms = start.elapsed().as_millis() as u64,
                "Tool execution failed"
            );
            format!("Error executing tool '{}': {}", name, e)
        }
        Err(_) => {
            warn!(tool = name, timeout_secs = limit.as_secs(), "Tool timed out");
            format!("Error: Tool '{}' timed out after {}s", name, limit.as_secs())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatabotError, Result};
    use crate::tools::EchoTool;
    use async_trait::async_trait;
    use serde_json::json;

    struct SlowTool {
        delay: Duration,
        limit: Option<Duration>,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok("woke up".into())
        }

        fn timeout(&self) -> Option<Duration> {
            self.limit
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String> {
            Err(DatabotError::Tool("disk on fire".into()))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(BrokenTool));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.names(), vec!["broken", "echo"]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(BrokenTool));
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "broken");
        assert_eq!(defs[1].name, "echo");
        assert_eq!(defs[1].parameters["type"], "object");
    }

    #[tokio::test]
    async fn test_unknown_tool_message() {
        let registry = ToolRegistry::new();
        assert_eq!(
            registry.execute("missing", json!({})).await,
            "Error: Unknown tool 'missing'"
        );
    }

    #[tokio::test]
    async fn test_error_is_folded_into_text() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(BrokenTool));
        let out = registry.execute("broken", json!({})).await;
        assert_eq!(
            out,
            "Error executing tool 'broken': Tool error: disk on fire"
        );
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SlowTool {
            delay: Duration::from_secs(5),
            limit: None,
        }));
        let out = registry
            .execute_with_context(
                "slow",
                json!({}),
                &ToolContext::new(),
                Duration::from_millis(20),
            )
            .await;
        assert_eq!(out, "Error: Tool 'slow' timed out after 0s");
    }

    #[tokio::test]
    async fn test_tool_timeout_override_wins() {
        let tool = SlowTool {
            delay: Duration::from_millis(50),
            limit: Some(Duration::from_secs(2)),
        };
        let out = run_tool(&tool, json!({}), &ToolContext::new(), Duration::from_millis(1)).await;
        assert_eq!(out, "woke up");
    }
}
