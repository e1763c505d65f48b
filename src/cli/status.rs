//! Status command handler.

use std::path::Path;

use anyhow::Result;

use databot::config::Config;

use super::common::build_connectors;

/// Print configuration paths and a connector health table.
pub(crate) async fn cmd_status(config: Config, config_path: Option<&Path>) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::path);

    println!("databot status");
    println!("==============");
    println!();
    println!(
        "  Config:   {} ({})",
        path.display(),
        if path.exists() { "exists" } else { "not found" }
    );
    println!("  Sessions: {}", config.session_db_path().display());
    if config.memory.enabled {
        println!("  Memory:   {}", config.memory_db_path().display());
    } else {
        println!("  Memory:   disabled");
    }
    println!("  Model:    {}", config.agent.model);
    let key_set = config
        .provider
        .api_key
        .as_deref()
        .is_some_and(|k| !k.is_empty());
    println!(
        "  API key:  {}",
        if key_set { "configured" } else { "not set" }
    );
    println!();

    let registry = build_connectors(&config);
    if registry.is_empty() {
        println!("No connectors configured.");
        return Ok(());
    }

    registry.connect_all().await;
    registry.health_check_all().await;

    println!("  {:<20} {:<12} {:<14} CAPABILITIES", "CONNECTOR", "TYPE", "STATUS");
    for descriptor in registry.descriptors() {
        let status = descriptor.status.map(|s| s.as_str()).unwrap_or("unknown");
        println!(
            "  {:<20} {:<12} {:<14} {}",
            descriptor.name,
            descriptor.connector_type.to_string(),
            status,
            descriptor.capabilities.join(", ")
        );
    }
    registry.disconnect_all().await;
    Ok(())
}
