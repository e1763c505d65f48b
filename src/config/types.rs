//! Configuration type definitions for Databot
//!
//! All types implement serde traits for JSON serialization and have sensible defaults,
//! so a partial config file only needs the keys it wants to change.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Main configuration struct for Databot
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Agent loop configuration (model, iterations, tool timeouts)
    pub agent: AgentConfig,
    /// Routing of messages to specialist agents
    pub routing: RoutingConfig,
    /// Message bus configuration
    pub bus: BusConfig,
    /// Session cache and durable store configuration
    pub session: SessionConfig,
    /// Persistent key/value memory configuration
    pub memory: MemoryConfig,
    /// Connector registry configuration and connector instances
    pub connectors: ConnectorsConfig,
    /// LLM provider configuration
    pub provider: ProviderConfig,
    /// Retry behavior for provider calls
    pub retry: RetryConfig,
    /// Gateway API server configuration
    pub gateway: GatewayConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Agent loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier passed to the provider
    pub model: String,
    /// Maximum tokens to generate per model call
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum model calls for one inbound message
    pub max_iterations: u32,
    /// Default per-tool timeout in seconds
    pub tool_timeout_secs: u64,
    /// Maximum turns processed concurrently across different chats
    pub max_concurrent_turns: usize,
    /// Replaces the built-in system prompt when set
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            max_iterations: 10,
            tool_timeout_secs: 120,
            max_concurrent_turns: 8,
            system_prompt: None,
        }
    }
}

/// Specialist agent routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Route each message to a specialist agent
    pub enabled: bool,
    /// How the specialist is chosen
    pub mode: RoutingMode,
    /// Agent used when nothing else matches
    pub default_agent: String,
    /// Model for LLM routing (defaults to the agent model)
    pub model: Option<String>,
    /// Specialist definitions; empty means the built-in set
    pub agents: Vec<AgentSpec>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: RoutingMode::Keyword,
            default_agent: "general".to_string(),
            model: None,
            agents: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Score messages against each agent's keywords
    #[default]
    Keyword,
    /// Ask the provider to pick, falling back to keywords on failure
    Llm,
}

/// A specialist agent: a domain prompt and the tools it may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentSpec {
    pub name: String,
    /// One line shown to the LLM router
    pub description: String,
    /// Added to the base system prompt for routed turns
    pub system_prompt: String,
    /// Tools offered to the model; empty means every registered tool
    pub tool_names: Vec<String>,
    /// Lowercase words or phrases that select this agent in keyword mode
    pub keywords: Vec<String>,
}

// ============================================================================
// Bus Configuration
// ============================================================================

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Capacity of each of the inbound, outbound and stream queues
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

// ============================================================================
// Session / Memory Configuration
// ============================================================================

/// Session cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum sessions resident in memory before LRU eviction
    pub max_cached: usize,
    /// Maximum messages kept per session (oldest trimmed)
    pub max_messages: usize,
    /// SQLite file for durable sessions (defaults to ~/.databot/sessions.db)
    pub db_path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_cached: 256,
            max_messages: 50,
            db_path: None,
        }
    }
}

/// Persistent memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Whether facts are injected into the prompt and the memory tool is registered
    pub enabled: bool,
    /// SQLite file for memory (defaults to ~/.databot/memory.db)
    pub db_path: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: None,
        }
    }
}

// ============================================================================
// Connector Configuration
// ============================================================================

/// Connector registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorsConfig {
    /// How long a cached health status stays fresh, in seconds
    pub health_ttl_secs: u64,
    /// Upper bound for a single health probe, in seconds
    pub health_timeout_secs: u64,
    /// Connector instances keyed by unique name
    pub instances: BTreeMap<String, ConnectorConfig>,
}

impl Default for ConnectorsConfig {
    fn default() -> Self {
        Self {
            health_ttl_secs: 30,
            health_timeout_secs: 10,
            instances: BTreeMap::new(),
        }
    }
}

/// Configuration for one connector instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Connector type: rest_api, catalog, sql, streaming (kafka), processing (spark)
    #[serde(rename = "type")]
    pub connector_type: String,
    /// Base URL for HTTP-backed connectors
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Attempts for transient HTTP failures
    pub max_retries: u32,
    /// Path probed by health checks
    pub health_path: String,
    /// Extra headers sent with every request
    pub headers: HashMap<String, String>,
    /// Authentication
    pub auth: Option<ConnectorAuth>,
    /// Catalog protocol prefix (Iceberg REST `/v1/{prefix}/...`)
    pub prefix: Option<String>,
    /// SQL driver name; only `sqlite` has a built-in client
    pub driver: String,
    /// SQL database location (file path for `sqlite`)
    pub database: Option<String>,
    /// Reject statements that modify the database
    pub read_only: bool,
    /// Rows returned by one SQL query
    pub max_rows: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connector_type: "rest_api".to_string(),
            base_url: String::new(),
            timeout_secs: 30,
            max_retries: 3,
            health_path: "/".to_string(),
            headers: HashMap::new(),
            auth: None,
            prefix: None,
            driver: "sqlite".to_string(),
            database: None,
            read_only: true,
            max_rows: 1000,
        }
    }
}

/// Authentication for HTTP-backed connectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorAuth {
    Basic { username: String, password: String },
    Bearer { token: String },
    ApiKey { header: String, key: String },
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// OpenAI-compatible provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key
    pub api_key: Option<String>,
    /// API base URL (OpenAI-compatible endpoints, local gateways)
    pub api_base: Option<String>,
}

/// Retry behavior for runtime provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable automatic retry for transient provider errors.
    pub enabled: bool,
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds for exponential backoff.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

// ============================================================================
// Gateway Configuration
// ============================================================================

/// Gateway server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Component,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Append log lines to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
