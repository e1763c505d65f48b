//! Provider retries.
//!
//! [`RetryProvider`] re-sends a chat request after rate limits, upstream 5xx
//! responses, timeouts and overload. Everything else, including auth and
//! billing failures, goes straight back to the agent loop.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{DatabotError, Result};
use crate::session::Message;

use super::{ChatOptions, LLMProvider, LLMResponse, StreamEvent, ToolDefinition};

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Wait before retry number `retry` (1-based): `base * 2^(retry - 1)`
    /// plus `jitter`, never more than `max`.
    pub fn delay(&self, retry: u32, jitter: Duration) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base
            .saturating_mul(factor)
            .saturating_add(jitter)
            .min(self.max)
    }

    /// Random jitter below `base`.
    fn jitter(&self) -> Duration {
        let span = (self.base.as_millis() as u64).max(1);
        Duration::from_millis(uuid::Uuid::new_v4().as_u128() as u64 % span)
    }
}

/// Wraps a provider and retries its transient failures.
pub struct RetryProvider {
    inner: Box<dyn LLMProvider>,
    max_retries: u32,
    backoff: Backoff,
}

impl std::fmt::Debug for RetryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryProvider")
            .field("inner", &self.inner.name())
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryProvider {
    /// Three retries, 1s base, 30s cap.
    pub fn new(inner: Box<dyn LLMProvider>) -> Self {
        Self {
            inner,
            max_retries: 3,
            backoff: Backoff {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
            },
        }
    }

    pub fn from_config(inner: Box<dyn LLMProvider>, config: &RetryConfig) -> Self {
        Self::new(inner)
            .with_max_retries(config.max_retries)
            .with_base_delay_ms(config.base_delay_ms)
            .with_max_delay_ms(config.max_delay_ms)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.backoff.base = Duration::from_millis(ms);
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.backoff.max = Duration::from_millis(ms);
        self
    }

    /// Sleeps and returns true when `err` deserves retry number `retry`.
    async fn pause_before(&self, retry: u32, err: &DatabotError, request: &str) -> bool {
        if !err.is_retryable() || retry > self.max_retries {
            return false;
        }
        let wait = self.backoff.delay(retry, self.backoff.jitter());
        warn!(
            provider = self.inner.name(),
            request,
            retry,
            max_retries = self.max_retries,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "Transient provider error, retrying"
        );
        tokio::time::sleep(wait).await;
        true
    }
}

#[async_trait]
impl LLMProvider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let mut retry = 1;
        loop {
            let err = match self
                .inner
                .chat(messages.clone(), tools.clone(), model, options.clone())
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if !self.pause_before(retry, &err, "chat").await {
                return Err(err);
            }
            retry += 1;
        }
    }

    /// Only opening the stream is retried; errors after the first event are
    /// delivered on the channel.
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let mut retry = 1;
        loop {
            let err = match self
                .inner
                .chat_stream(messages.clone(), tools.clone(), model, options.clone())
                .await
            {
                Ok(events) => return Ok(events),
                Err(err) => err,
            };
            if !self.pause_before(retry, &err, "chat_stream").await {
                return Err(err);
            }
            retry += 1;
        }
    }
}
