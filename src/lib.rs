//! databot - data platform assistant
//!
//! A long-running process that accepts messages from several channels, runs a
//! tool-calling agent loop against an LLM, and reaches databases, REST APIs and
//! catalogs through a uniform connector registry.

pub mod agent;
pub mod bus;
pub mod config;
pub mod connectors;
pub mod error;
pub mod gateway;
pub mod health;
pub mod memory;
pub mod providers;
pub mod session;
pub mod tools;
pub mod utils;

pub use agent::{AgentLoop, ApprovalHandler, ContextBuilder, ContextEnricher};
pub use bus::{InboundMessage, MessageBus, OutboundMessage, StreamEvent};
pub use config::Config;
pub use connectors::{Connector, ConnectorRegistry};
pub use error::{DatabotError, Result};
pub use providers::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};
pub use session::{Message, Role, Session, SessionCache, ToolCall};
