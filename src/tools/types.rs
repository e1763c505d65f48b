//! Tool types for Databot
//!
//! This module defines the `Tool` trait that every model-callable tool
//! implements, and the `ToolContext` passed to each execution.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Trait that all tools must implement.
///
/// A tool returns plain text for the model. Returning `Err` is fine; the
/// registry turns it into an `Error executing tool ...` result instead of
/// failing the turn.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use databot::tools::{Tool, ToolContext};
/// use databot::error::Result;
///
/// struct Ping;
///
/// #[async_trait]
/// impl Tool for Ping {
///     fn name(&self) -> &str { "ping" }
///     fn description(&self) -> &str { "Replies with pong" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({"type": "object", "properties": {}})
///     }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String> {
///         Ok("pong".into())
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to request this tool.
    fn name(&self) -> &str;

    /// Sent to the model to explain when to use the tool.
    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> Value;

    /// Run the tool.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String>;

    /// Per-tool override of the loop's default timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether the call must pass the approval handler first.
    fn requires_approval(&self) -> bool {
        false
    }
}

/// Where a tool call came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolContext {
    /// The channel name (e.g., "api", "cli", "slack")
    pub channel: Option<String>,
    /// The conversation the call belongs to
    pub chat_id: Option<String>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the channel and chat ID.
    ///
    /// # Example
    /// ```
    /// use databot::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new().with_channel("api", "c1");
    /// assert_eq!(ctx.channel.as_deref(), Some("api"));
    /// assert_eq!(ctx.chat_id.as_deref(), Some("c1"));
    /// ```
    pub fn with_channel(mut self, channel: &str, chat_id: &str) -> Self {
        self.channel = Some(channel.to_string());
        self.chat_id = Some(chat_id.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    #[async_trait]
    impl Tool for Plain {
        fn name(&self) -> &str {
            "plain"
        }

        fn description(&self) -> &str {
            "does nothing"
        }

        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_tool_defaults() {
        assert_eq!(Plain.timeout(), None);
        assert!(!Plain.requires_approval());
    }

    #[test]
    fn test_tool_context_default() {
        let ctx = ToolContext::default();
        assert!(ctx.channel.is_none());
        assert!(ctx.chat_id.is_none());
        assert_eq!(ctx, ToolContext::new());
    }
}
