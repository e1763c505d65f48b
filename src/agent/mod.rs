//! Agent module - Core AI agent logic and conversation handling
//!
//! The agent is responsible for:
//!
//! - Consuming inbound messages from the bus
//! - Enriching the user message and building context (system prompt,
//!   persistent memory, session history)
//! - Optionally routing the message to a specialist agent, which adds a
//!   domain prompt and narrows the offered tools
//! - Calling the LLM provider and executing requested tools
//! - Persisting the turn and publishing the reply or stream events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  MessageBus │────>│  AgentLoop  │────>│ LLMProvider │
//! │  (inbound)  │     │             │     │  (+ retry)  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │   Session   │     │    Tools    │
//!                     │    Cache    │     │ (connectors)│
//!                     └─────────────┘     └─────────────┘
//! ```

mod context;
mod r#loop;
pub mod router;

pub use context::ContextBuilder;
pub use r#loop::{
    AgentLoop, AgentReply, ApprovalHandler, ContextEnricher, INTERNAL_ERROR_MESSAGE,
    ITERATION_LIMIT_MESSAGE,
};
pub use router::Router;
