//! Message types for the Databot message bus
//!
//! This module defines the three payloads that travel on the bus: inbound
//! messages from channels, outbound replies, and token-level stream events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

/// A message received from a channel adapter, waiting for the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Origin tag of the adapter ("api", "cli", "slack", ...)
    pub channel: String,
    /// Identifier of the user who sent the message
    pub sender_id: String,
    /// Conversation identity, stable across turns
    pub chat_id: String,
    /// Raw user text
    pub content: String,
    /// Caller wants token-level stream events instead of a single reply
    pub stream: bool,
    /// Adapter-specific extras
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Create a new non-streaming inbound message.
    ///
    /// # Example
    /// ```
    /// use databot::bus::InboundMessage;
    ///
    /// let msg = InboundMessage::new("api", "alice", "c1", "2+2?");
    /// assert_eq!(msg.chat_id, "c1");
    /// assert!(!msg.stream);
    /// ```
    pub fn new(channel: &str, sender_id: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            stream: false,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Request token-level stream events for this message.
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Whether an outbound reply is an answer or a sanitized failure notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    #[default]
    Ok,
    Error,
}

/// A reply produced by the agent loop for a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    /// Final answer text (or the sanitized error notice)
    pub content: String,
    /// Which specialist agent produced the reply, if any
    pub agent: Option<String>,
    pub status: ReplyStatus,
}

impl OutboundMessage {
    pub fn new(channel: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            agent: None,
            status: ReplyStatus::Ok,
        }
    }

    /// Build a reply addressed to the origin of `inbound`.
    pub fn reply_to(inbound: &InboundMessage, content: &str) -> Self {
        Self::new(&inbound.channel, &inbound.chat_id, content)
    }

    /// Build an error reply addressed to the origin of `inbound`.
    pub fn error_to(inbound: &InboundMessage, content: &str) -> Self {
        let mut msg = Self::reply_to(inbound, content);
        msg.status = ReplyStatus::Error;
        msg
    }

    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ReplyStatus::Error
    }
}

/// The payload of a stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventKind {
    Delta { text: String },
    ToolStart { tool_name: String, args: String },
    ToolResult { tool_name: String, result: String },
    Done { text: String },
    Error { message: String },
}

impl StreamEventKind {
    /// Wire name used by SSE consumers.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEventKind::Delta { .. } => "delta",
            StreamEventKind::ToolStart { .. } => "tool_start",
            StreamEventKind::ToolResult { .. } => "tool_result",
            StreamEventKind::Done { .. } => "done",
            StreamEventKind::Error { .. } => "error",
        }
    }

    /// `true` for the events that end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEventKind::Done { .. } | StreamEventKind::Error { .. }
        )
    }
}

/// A token-level event for one chat, delivered in production order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub channel: String,
    pub chat_id: String,
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn new(channel: &str, chat_id: &str, kind: StreamEventKind) -> Self {
        Self {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            kind,
        }
    }

    pub fn delta(channel: &str, chat_id: &str, text: &str) -> Self {
        Self::new(channel, chat_id, StreamEventKind::Delta { text: text.into() })
    }

    pub fn done(channel: &str, chat_id: &str, text: &str) -> Self {
        Self::new(channel, chat_id, StreamEventKind::Done { text: text.into() })
    }

    pub fn error(channel: &str, chat_id: &str, message: &str) -> Self {
        Self::new(
            channel,
            chat_id,
            StreamEventKind::Error {
                message: message.into(),
            },
        )
    }

    /// Flat `{type, data, tool_name}` shape sent to SSE clients.
    ///
    /// # Example
    /// ```
    /// use databot::bus::StreamEvent;
    ///
    /// let ev = StreamEvent::delta("api", "c1", "Hel");
    /// let wire = ev.to_wire();
    /// assert_eq!(wire["type"], "delta");
    /// assert_eq!(wire["data"], "Hel");
    /// assert_eq!(wire["tool_name"], "");
    /// ```
    pub fn to_wire(&self) -> serde_json::Value {
        let (data, tool_name) = match &self.kind {
            StreamEventKind::Delta { text } | StreamEventKind::Done { text } => (text.as_str(), ""),
            StreamEventKind::ToolStart { tool_name, args } => (args.as_str(), tool_name.as_str()),
            StreamEventKind::ToolResult { tool_name, result } => {
                (result.as_str(), tool_name.as_str())
            }
            StreamEventKind::Error { message } => (message.as_str(), ""),
        };
        json!({
            "type": self.kind.name(),
            "data": data,
            "tool_name": tool_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_creation() {
        let msg = InboundMessage::new("api", "user123", "chat456", "Hello");
        assert_eq!(msg.channel, "api");
        assert_eq!(msg.sender_id, "user123");
        assert_eq!(msg.content, "Hello");
        assert!(!msg.stream);
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn test_inbound_streaming_and_metadata() {
        let msg = InboundMessage::new("api", "u", "c", "hi")
            .streaming()
            .with_metadata("trace", "abc");
        assert!(msg.stream);
        assert_eq!(msg.metadata.get("trace"), Some(&"abc".to_string()));
    }

    #[test]
    fn test_outbound_reply_and_error() {
        let inbound = InboundMessage::new("slack", "u", "c9", "q");
        let ok = OutboundMessage::reply_to(&inbound, "answer").with_agent("sql");
        assert_eq!(ok.channel, "slack");
        assert_eq!(ok.chat_id, "c9");
        assert_eq!(ok.agent.as_deref(), Some("sql"));
        assert!(!ok.is_error());

        let err = OutboundMessage::error_to(&inbound, "sorry");
        assert!(err.is_error());
    }

    #[test]
    fn test_stream_event_wire_shape() {
        let start = StreamEvent::new(
            "api",
            "c1",
            StreamEventKind::ToolStart {
                tool_name: "sql".into(),
                args: r#"{"q":"select 1"}"#.into(),
            },
        );
        let wire = start.to_wire();
        assert_eq!(wire["type"], "tool_start");
        assert_eq!(wire["tool_name"], "sql");
        assert_eq!(wire["data"], r#"{"q":"select 1"}"#);

        let err = StreamEvent::error("api", "c1", "boom").to_wire();
        assert_eq!(err["type"], "error");
        assert_eq!(err["data"], "boom");
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(StreamEvent::done("a", "b", "x").kind.is_terminal());
        assert!(StreamEvent::error("a", "b", "x").kind.is_terminal());
        assert!(!StreamEvent::delta("a", "b", "x").kind.is_terminal());
    }
}
