//! Shared component wiring for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use databot::agent::{AgentLoop, ContextBuilder, Router};
use databot::bus::MessageBus;
use databot::config::Config;
use databot::connectors::{self, ConnectorRegistry};
use databot::memory::MemoryStore;
use databot::providers::build_provider;
use databot::session::{SessionCache, SessionStore};
use databot::tools::{ConnectorTool, MemoryTool};

/// Everything a command needs, built once from config.
pub(crate) struct Components {
    pub bus: Arc<MessageBus>,
    pub connectors: Arc<ConnectorRegistry>,
    pub agent: Arc<AgentLoop>,
}

/// Registry with every configured connector registered (not yet connected).
pub(crate) fn build_connectors(config: &Config) -> Arc<ConnectorRegistry> {
    let registry = Arc::new(ConnectorRegistry::with_health_settings(
        Duration::from_secs(config.connectors.health_ttl_secs),
        Duration::from_secs(config.connectors.health_timeout_secs),
    ));
    let failures = connectors::load_from_config(&registry, &config.connectors.instances);
    for (name, err) in &failures {
        warn!(connector = %name, error = %err, "Connector skipped");
    }
    registry
}

pub(crate) async fn build_components(config: &Config) -> Result<Components> {
    let bus = Arc::new(MessageBus::with_capacity(config.bus.capacity));

    let session_path = config.session_db_path();
    let store = Arc::new(
        SessionStore::open(&session_path)
            .with_context(|| format!("Failed to open session store {}", session_path.display()))?,
    );
    let sessions = Arc::new(SessionCache::new(
        store,
        config.session.max_cached,
        config.session.max_messages,
    ));

    let connectors = build_connectors(config);

    let mut context = ContextBuilder::new();
    if let Some(prompt) = config.agent.system_prompt.as_deref() {
        context = context.with_system_prompt(prompt);
    }
    let memory = if config.memory.enabled {
        let path = config.memory_db_path();
        let store = Arc::new(
            MemoryStore::open(&path)
                .with_context(|| format!("Failed to open memory store {}", path.display()))?,
        );
        context = context.with_memory(Arc::clone(&store));
        Some(store)
    } else {
        None
    };

    let provider = build_provider(config);
    let mut agent = AgentLoop::new(
        config.agent.clone(),
        Arc::clone(&bus),
        Arc::clone(&provider),
        sessions,
    )
    .with_context_builder(context);
    if config.routing.enabled {
        let router = Router::from_config(&config.routing, provider);
        info!(
            agents = ?router.names(),
            mode = ?config.routing.mode,
            "Specialist routing enabled"
        );
        agent = agent.with_router(Arc::new(router));
    }

    agent
        .register_tool(Box::new(ConnectorTool::new(Arc::clone(&connectors))))
        .await;
    if let Some(store) = memory {
        agent.register_tool(Box::new(MemoryTool::new(store))).await;
    }
    info!(tools = ?agent.tool_names().await, "Agent ready");

    Ok(Components {
        bus,
        connectors,
        agent: Arc::new(agent),
    })
}

/// Warn on stderr when no provider key is configured.
pub(crate) fn warn_missing_api_key(config: &Config) {
    let missing = config
        .provider
        .api_key
        .as_deref()
        .map(str::is_empty)
        .unwrap_or(true);
    if missing {
        eprintln!("Warning: No API key configured. Set DATABOT_PROVIDER_API_KEY");
        eprintln!("or add provider.api_key to {:?}", Config::path());
        eprintln!();
    }
}
