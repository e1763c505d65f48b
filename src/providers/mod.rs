//! Providers module - LLM backends
//!
//! This module defines the `LLMProvider` trait and common types for talking
//! to language models. [`OpenAIProvider`] speaks the OpenAI-compatible Chat
//! Completions protocol; [`RetryProvider`] wraps any provider with backoff
//! on transient failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use databot::providers::{ChatOptions, LLMProvider, OpenAIProvider, RetryProvider};
//! use databot::session::Message;
//!
//! async fn example() {
//!     let provider = RetryProvider::new(Box::new(OpenAIProvider::new("your-api-key")));
//!     let options = ChatOptions::new().with_max_tokens(1000);
//!     let response = provider
//!         .chat(vec![Message::user("Hello!")], vec![], None, options)
//!         .await
//!         .unwrap();
//!     println!("Response: {}", response.content);
//! }
//! ```

pub mod openai;
pub mod retry;
mod types;
pub mod usage;

use std::sync::Arc;

use crate::config::Config;
use crate::error::ProviderError;

pub use openai::OpenAIProvider;
pub use retry::{Backoff, RetryProvider};
pub use types::{
    ChatOptions, LLMProvider, LLMResponse, LLMToolCall, StreamEvent, ToolDefinition, Usage,
    STREAM_BUFFER,
};
pub use usage::{ProviderUsage, UsageTracker};

/// Parse an HTTP status code and response body into a structured [`ProviderError`].
pub fn parse_provider_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth(body.to_string()),
        402 => ProviderError::Billing(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        408 => ProviderError::Timeout(body.to_string()),
        429 => ProviderError::RateLimit(body.to_string()),
        400 | 422 => ProviderError::InvalidRequest(body.to_string()),
        503 | 529 => ProviderError::Overloaded(body.to_string()),
        500..=599 => ProviderError::ServerError(body.to_string()),
        _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
    }
}

/// Build the configured provider, wrapped in retry when enabled.
pub fn build_provider(config: &Config) -> Arc<dyn LLMProvider> {
    let api_key = config.provider.api_key.clone().unwrap_or_default();
    let inner = match config.provider.api_base.as_deref() {
        Some(base) if !base.is_empty() => OpenAIProvider::with_base_url(&api_key, base),
        _ => OpenAIProvider::new(&api_key),
    };
    if config.retry.enabled {
        Arc::new(RetryProvider::from_config(Box::new(inner), &config.retry))
    } else {
        Arc::new(inner)
    }
}
