//! Gateway command handler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use databot::config::Config;
use databot::gateway::{self, GatewayState};
use databot::health::start_periodic_usage_flush;

use super::common::{build_components, warn_missing_api_key};

/// Run the agent loop and the HTTP gateway until Ctrl+C.
pub(crate) async fn cmd_gateway(mut config: Config, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.gateway.port = port;
    }
    warn_missing_api_key(&config);

    let components = build_components(&config).await?;
    let bus = Arc::clone(&components.bus);
    let agent = Arc::clone(&components.agent);
    let connectors = Arc::clone(&components.connectors);

    let statuses = connectors.connect_all().await;
    for (name, status) in &statuses {
        println!("  connector {:<20} {}", name, status.as_str());
    }

    // Replies to bus-originated messages have no channel adapter here.
    bus.subscribe_outbound("log", |msg| async move {
        debug!(channel = %msg.channel, chat_id = %msg.chat_id, status = ?msg.status, "Outbound reply");
        Ok(())
    });
    bus.start();

    let agent_handle = tokio::spawn(Arc::clone(&agent).start());

    let (usage_shutdown_tx, usage_shutdown_rx) = tokio::sync::watch::channel(false);
    let usage_flush_handle =
        start_periodic_usage_flush(Arc::clone(agent.metrics()), usage_shutdown_rx);

    println!();
    println!(
        "databot gateway listening on http://{}:{}",
        config.gateway.host, config.gateway.port
    );
    println!("Press Ctrl+C to stop.");
    println!();

    let state = GatewayState::new(Arc::clone(&agent), Arc::clone(&connectors));
    let served = gateway::serve(&config.gateway, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    })
    .await;

    println!();
    println!("Shutting down...");

    let _ = usage_shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), usage_flush_handle).await;

    agent.stop();
    match agent_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Agent loop exited with error"),
        Err(e) => error!(error = %e, "Agent loop task panicked"),
    }
    bus.stop().await;

    match agent.sessions().flush_all().await {
        Ok(n) => info!(flushed = n, "Sessions flushed"),
        Err(e) => error!(error = %e, "Failed to flush sessions on shutdown"),
    }
    for (name, result) in connectors.disconnect_all().await {
        if let Err(e) = result {
            warn!(connector = %name, error = %e, "Disconnect failed");
        }
    }

    served.with_context(|| "Gateway server failed")?;
    println!("Gateway stopped.");
    Ok(())
}
