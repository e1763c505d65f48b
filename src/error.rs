//! Error types for Databot
//!
//! This module defines all error types used throughout the crate.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured provider error classification.
///
/// Carries the retryable/fatal distinction the agent loop uses to decide
/// between backing off and giving up on a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 401 — Invalid API key or authentication failure
    Auth(String),
    /// 429 — Rate limit or quota exceeded
    RateLimit(String),
    /// 402 — Payment required or billing issue
    Billing(String),
    /// 500/502/503/504 — Server-side errors
    ServerError(String),
    /// 400 — Bad request, invalid JSON, malformed parameters
    InvalidRequest(String),
    /// 404 — Model not found or endpoint not available
    ModelNotFound(String),
    /// Connection or read timeout
    Timeout(String),
    /// Connection refused, DNS failure, reset mid-request
    Network(String),
    /// Provider is overloaded — retry with backoff
    Overloaded(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::Billing(msg) => write!(f, "Billing error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Network(msg) => write!(f, "Network error: {}", msg),
            ProviderError::Overloaded(msg) => write!(f, "Overloaded error: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns `true` if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_)
                | ProviderError::ServerError(_)
                | ProviderError::Timeout(_)
                | ProviderError::Network(_)
                | ProviderError::Overloaded(_)
        )
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::Billing(_) => Some(402),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Overloaded(_) => Some(503),
            ProviderError::Timeout(_) | ProviderError::Network(_) | ProviderError::Unknown(_) => {
                None
            }
        }
    }
}

impl From<ProviderError> for DatabotError {
    fn from(err: ProviderError) -> Self {
        DatabotError::ProviderTyped(err)
    }
}

// ============================================================================
// Connector Errors
// ============================================================================

/// Errors raised by the connector registry and individual connectors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// No connector registered under the requested name
    #[error("Connector '{name}' not found. Available: {available}")]
    NotFound { name: String, available: String },

    /// The connector does not advertise the requested operation
    #[error("Connector '{connector}' does not support operation '{operation}'. Supported: {supported}")]
    UnsupportedOperation {
        connector: String,
        operation: String,
        supported: String,
    },

    /// The external system could not be reached
    #[error("Connector '{0}' is unreachable: {1}")]
    Unreachable(String, String),

    /// A connector with this name is already registered
    #[error("Connector '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Configuration is missing or invalid for this connector
    #[error("Connector '{0}' is not configured: {1}")]
    NotConfigured(String, String),

    /// The operation ran but failed
    #[error("Connector '{0}' failed: {1}")]
    Failed(String, String),
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for Databot operations.
#[derive(Error, Debug)]
pub enum DatabotError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Untyped provider errors (response parsing, stream interruptions).
    #[error("Provider error: {0}")]
    Provider(String),

    /// Structured provider error with classification for retry decisions.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// Tool execution errors (invalid arguments, execution failures, etc.)
    #[error("Tool error: {0}")]
    Tool(String),

    /// A tool did not finish within its timeout
    #[error("Tool '{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    /// Connector registry or connector operation failure
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Durable session storage failure
    #[error("Session store error: {0}")]
    SessionStore(String),

    /// Persistent memory storage failure
    #[error("Memory error: {0}")]
    Memory(String),

    /// Bus queue at capacity under the non-blocking publish policy
    #[error("Bus error: {0} queue full")]
    QueueFull(&'static str),

    /// Bus stopped; no further publishes are accepted
    #[error("Bus error: channel closed")]
    BusClosed,

    /// A bus handler failed while processing a message
    #[error("Handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl DatabotError {
    /// Returns `true` for provider failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DatabotError::ProviderTyped(pe) => pe.is_retryable(),
            DatabotError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// A Result type alias using DatabotError.
pub type Result<T> = std::result::Result<T, DatabotError>;
