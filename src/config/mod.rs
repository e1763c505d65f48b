//! Configuration management for Databot
//!
//! Configuration is loaded from `~/.databot/config.json` with environment variable overrides.

mod types;

pub use types::*;

use crate::error::{DatabotError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the Databot configuration directory path (~/.databot)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".databot")
    }

    /// Returns the path to the config file (~/.databot/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `DATABOT_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                DatabotError::Config(format!("invalid config file {}: {}", path.display(), e))
            })?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Path of the SQLite session store.
    pub fn session_db_path(&self) -> PathBuf {
        self.session
            .db_path
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| Self::dir().join("sessions.db"))
    }

    /// Path of the SQLite memory store.
    pub fn memory_db_path(&self) -> PathBuf {
        self.memory
            .db_path
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| Self::dir().join("memory.db"))
    }

    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> Result<()> {
        if self.bus.capacity == 0 {
            return Err(DatabotError::Config("bus.capacity must be at least 1".into()));
        }
        if self.agent.max_iterations == 0 {
            return Err(DatabotError::Config(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.max_concurrent_turns == 0 {
            return Err(DatabotError::Config(
                "agent.max_concurrent_turns must be at least 1".into(),
            ));
        }
        if let Some(spec) = self.routing.agents.iter().find(|a| a.name.trim().is_empty()) {
            return Err(DatabotError::Config(format!(
                "routing.agents entry '{}' has no name",
                spec.description
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: DATABOT_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        // Agent
        if let Ok(val) = std::env::var("DATABOT_AGENT_MODEL") {
            self.agent.model = val;
        }
        if let Some(v) = env_parse("DATABOT_AGENT_MAX_TOKENS") {
            self.agent.max_tokens = v;
        }
        if let Some(v) = env_parse("DATABOT_AGENT_TEMPERATURE") {
            self.agent.temperature = v;
        }
        if let Some(v) = env_parse("DATABOT_AGENT_MAX_ITERATIONS") {
            self.agent.max_iterations = v;
        }
        if let Some(v) = env_parse("DATABOT_AGENT_TOOL_TIMEOUT_SECS") {
            self.agent.tool_timeout_secs = v;
        }

        // Bus and sessions
        if let Some(v) = env_parse("DATABOT_BUS_CAPACITY") {
            self.bus.capacity = v;
        }
        if let Some(v) = env_parse("DATABOT_SESSION_MAX_CACHED") {
            self.session.max_cached = v;
        }
        if let Ok(val) = std::env::var("DATABOT_SESSION_DB_PATH") {
            self.session.db_path = Some(val);
        }

        // Provider
        if let Ok(val) = std::env::var("DATABOT_PROVIDER_API_KEY") {
            self.provider.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("DATABOT_PROVIDER_API_BASE") {
            self.provider.api_base = Some(val);
        }

        // Gateway
        if let Ok(val) = std::env::var("DATABOT_GATEWAY_HOST") {
            self.gateway.host = val;
        }
        if let Some(v) = env_parse("DATABOT_GATEWAY_PORT") {
            self.gateway.port = v;
        }

        // Logging
        if let Ok(val) = std::env::var("DATABOT_LOGGING_LEVEL") {
            self.logging.level = val;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
