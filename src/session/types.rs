//! Session types for Databot
//!
//! This module defines the core types for session and conversation management,
//! including messages, roles, and tool calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default maximum number of messages kept per session.
pub const DEFAULT_MAX_MESSAGES: usize = 50;

/// A conversation session.
///
/// Holds the role-tagged history for one `chat_id`. Pushing past
/// `max_messages` drops the oldest entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Conversation identity
    pub chat_id: String,
    /// Ordered history, oldest first
    pub messages: Vec<Message>,
    /// Maximum number of messages retained
    pub max_messages: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session with the default message bound.
    ///
    /// # Example
    /// ```
    /// use databot::session::Session;
    ///
    /// let session = Session::new("c1");
    /// assert!(session.is_empty());
    /// assert_eq!(session.max_messages, 50);
    /// ```
    pub fn new(chat_id: &str) -> Self {
        Self::with_max_messages(chat_id, DEFAULT_MAX_MESSAGES)
    }

    /// Create a new empty session keeping at most `max_messages` (minimum 1).
    pub fn with_max_messages(chat_id: &str, max_messages: usize) -> Self {
        let now = Utc::now();
        Self {
            chat_id: chat_id.to_string(),
            messages: Vec::new(),
            max_messages: max_messages.max(1),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, trimming the oldest ones past the bound.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.trim();
        self.updated_at = Utc::now();
    }

    /// Drop the oldest messages until the bound holds.
    pub fn trim(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn messages_by_role(&self, role: Role) -> Vec<&Message> {
        self.messages.iter().filter(|m| m.role == role).collect()
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by the assistant (in-flight context only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// The call this tool result answers
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced this result
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: &str) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: &str) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a tool result answering `tool_call_id`, produced by tool `name`.
    pub fn tool_result(tool_call_id: &str, name: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            name: Some(name.to_string()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|tc| !tc.is_empty())
            .unwrap_or(false)
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool && self.tool_call_id.is_some()
    }
}

/// Message author.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}

/// Summary row returned by session listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}
