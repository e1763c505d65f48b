//! Context builder for agent conversations
//!
//! Assembles what the model sees for one call: the system prompt (with the
//! persistent memory section), the session history, and the current user
//! message.

use std::sync::Arc;

use crate::config::AgentSpec;
use crate::error::Result;
use crate::memory::{self, MemoryStore};
use crate::session::{Message, Role};

/// Default system prompt for the databot agent
const DEFAULT_SYSTEM_PROMPT: &str = r#"You are databot, an AI assistant for data platform operations. You help data engineers monitor pipelines, diagnose data quality issues, query databases, and manage infrastructure.

Use the `connector` tool to reach configured data systems and the `memory` tool to remember facts across conversations.

When using tools:
- Prefer read-only operations unless explicitly asked to modify something
- Format query results as readable tables
- If a query might be expensive, warn the user first

Be concise, technical, and helpful. Use markdown formatting in your responses."#;

/// Builder for constructing conversation context for LLM calls.
///
/// # Example
///
/// ```rust
/// use databot::agent::ContextBuilder;
/// use databot::session::Message;
///
/// let builder = ContextBuilder::new();
/// let facts = vec![("team".to_string(), "data-eng".to_string())];
/// let messages = builder.build_messages(&facts, vec![Message::user("hi")], "2+2?");
/// assert_eq!(messages.len(), 3);
/// assert!(messages[0].content.contains("- team: data-eng"));
/// ```
pub struct ContextBuilder {
    system_prompt: String,
    memory: Option<Arc<MemoryStore>>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            memory: None,
        }
    }

    /// Replace the built-in system prompt.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Read persistent facts from `store` on every build.
    pub fn with_memory(mut self, store: Arc<MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    /// System message with a `## Persistent Memory` section when there are facts.
    pub fn build_system_message(&self, memories: &[(String, String)]) -> Message {
        self.system_message(memories, None)
    }

    fn system_message(
        &self,
        memories: &[(String, String)],
        specialist: Option<&AgentSpec>,
    ) -> Message {
        let mut content = self.system_prompt.clone();
        if let Some(spec) = specialist.filter(|s| !s.system_prompt.is_empty()) {
            content.push_str(&format!(
                "\n\n## Specialist: {}\n\n{}",
                spec.name, spec.system_prompt
            ));
        }
        if !memories.is_empty() {
            content.push_str("\n\n## Persistent Memory\n");
            for (key, value) in memories {
                content.push_str(&format!("\n- {}: {}", key, value));
            }
        }
        Message::system(&content)
    }

    /// Full message list: system, replayed history, then `user_input`.
    ///
    /// Stored tool results have lost the assistant call they answered, so
    /// they are replayed as assistant notes. In-flight tool messages (with a
    /// matching call earlier in `history`) pass through unchanged.
    pub fn build_messages(
        &self,
        memories: &[(String, String)],
        history: Vec<Message>,
        user_input: &str,
    ) -> Vec<Message> {
        self.assemble(memories, None, history, user_input)
    }

    fn assemble(
        &self,
        memories: &[(String, String)],
        specialist: Option<&AgentSpec>,
        history: Vec<Message>,
        user_input: &str,
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(self.system_message(memories, specialist));
        messages.extend(replay_history(history));
        if !user_input.is_empty() {
            messages.push(Message::user(user_input));
        }
        messages
    }

    /// Like [`build_messages`](Self::build_messages), reading facts from the
    /// memory store first. A memory read failure fails the build.
    pub async fn build(&self, history: Vec<Message>, user_input: &str) -> Result<Vec<Message>> {
        self.build_for(None, history, user_input).await
    }

    /// [`build`](Self::build) with the routed specialist's prompt appended
    /// to the system prompt.
    pub async fn build_for(
        &self,
        specialist: Option<&AgentSpec>,
        history: Vec<Message>,
        user_input: &str,
    ) -> Result<Vec<Message>> {
        let memories = match &self.memory {
            Some(store) => memory::blocking(store, |s| s.all()).await?,
            None => Vec::new(),
        };
        Ok(self.assemble(&memories, specialist, history, user_input))
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn replay_history(history: Vec<Message>) -> Vec<Message> {
    let mut open_calls: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(history.len());
    for msg in history {
        if let Some(calls) = &msg.tool_calls {
            open_calls.extend(calls.iter().map(|c| c.id.clone()));
            out.push(msg);
            continue;
        }
        if msg.role == Role::Tool {
            let answered = msg
                .tool_call_id
                .as_ref()
                .is_some_and(|id| open_calls.contains(id));
            if !answered {
                let name = msg.name.as_deref().unwrap_or("tool");
                out.push(Message::assistant(&format!(
                    "[{} result]\n{}",
                    name, msg.content
                )));
                continue;
            }
        }
        out.push(msg);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;

    #[test]
    fn test_default_prompt() {
        let builder = ContextBuilder::new();
        assert!(builder.system_prompt().contains("databot"));
        assert!(!builder.has_memory());
    }

    #[test]
    fn test_custom_prompt() {
        let builder = ContextBuilder::default().with_system_prompt("Be brief.");
        assert_eq!(builder.build_system_message(&[]).content, "Be brief.");
    }

    #[test]
    fn test_memory_section() {
        let builder = ContextBuilder::new().with_system_prompt("P");
        let facts = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        let system = builder.build_system_message(&facts);
        assert_eq!(system.role, Role::System);
        assert_eq!(system.content, "P\n\n## Persistent Memory\n\n- a: 1\n- b: 2");
    }

    #[test]
    fn test_empty_input_is_not_appended() {
        let builder = ContextBuilder::new();
        let messages = builder.build_messages(&[], vec![Message::user("q")], "");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "q");
    }

    #[test]
    fn test_stored_tool_results_replayed_as_notes() {
        let builder = ContextBuilder::new();
        let history = vec![
            Message::user("how many rows?"),
            Message::tool_result("call_1", "connector", "| n |\n| --- |\n| 3 |"),
            Message::assistant("3 rows."),
        ];
        let messages = builder.build_messages(&[], history, "thanks");
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].role, Role::Assistant);
        assert!(messages[2].content.starts_with("[connector result]\n"));
        assert_eq!(messages[4].content, "thanks");
    }

    #[test]
    fn test_in_flight_tool_results_pass_through() {
        let builder = ContextBuilder::new();
        let history = vec![
            Message::user("q"),
            Message::assistant_with_tools("", vec![ToolCall::new("c1", "echo", "{}")]),
            Message::tool_result("c1", "echo", "ok"),
        ];
        let messages = builder.build_messages(&[], history, "");
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_specialist_prompt_before_memory() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        store.set("team", "data-eng").unwrap();
        let builder = ContextBuilder::new().with_system_prompt("Base.").with_memory(store);
        let spec = AgentSpec {
            name: "sql".into(),
            system_prompt: "You are a SQL expert.".into(),
            ..AgentSpec::default()
        };
        let messages = builder.build_for(Some(&spec), vec![], "q").await.unwrap();
        assert_eq!(
            messages[0].content,
            "Base.\n\n## Specialist: sql\n\nYou are a SQL expert.\n\n## Persistent Memory\n\n- team: data-eng"
        );
    }

    #[tokio::test]
    async fn test_build_reads_memory() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        store.set("warehouse", "snowflake").unwrap();
        let builder = ContextBuilder::new().with_memory(store);
        let messages = builder.build(vec![], "hi").await.unwrap();
        assert!(messages[0].content.contains("- warehouse: snowflake"));
        assert_eq!(messages[1].content, "hi");
    }
}
