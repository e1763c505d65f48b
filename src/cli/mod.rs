//! CLI module — command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod agent;
pub mod common;
pub mod gateway;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use databot::config::Config;

#[derive(Parser)]
#[command(name = "databot")]
#[command(version)]
#[command(about = "Data platform assistant", long_about = None)]
struct Cli {
    /// Path to the config file (defaults to ~/.databot/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway and the agent loop
    Gateway {
        /// Port to listen on (overrides gateway.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Chat with the agent. Interactive mode if no message is given
    Agent {
        /// Single message to process
        #[arg(short, long)]
        message: Option<String>,
        /// Session to use
        #[arg(long, default_value = "cli")]
        chat_id: String,
        /// Stream the response as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Show configuration and connector health
    Status,
    /// Show version information
    Version,
}

/// Entry point for the CLI — called from main().
pub async fn run() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    databot::utils::logging::init_logging(&config.logging)
        .with_context(|| "Failed to initialize logging")?;

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            println!("databot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Gateway { port }) => {
            gateway::cmd_gateway(config, port).await?;
        }
        Some(Commands::Agent {
            message,
            chat_id,
            stream,
        }) => {
            agent::cmd_agent(config, message, &chat_id, stream).await?;
        }
        Some(Commands::Status) => {
            status::cmd_status(config, cli.config.as_deref()).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load_from_path(p)
            .with_context(|| format!("Failed to load configuration from {}", p.display())),
        None => Config::load().with_context(|| "Failed to load configuration"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_agent() {
        let cli = Cli::try_parse_from(["databot", "agent", "-m", "2+2?", "--stream"]).unwrap();
        match cli.command {
            Some(Commands::Agent {
                message,
                chat_id,
                stream,
            }) => {
                assert_eq!(message.as_deref(), Some("2+2?"));
                assert_eq!(chat_id, "cli");
                assert!(stream);
            }
            _ => panic!("expected agent command"),
        }
    }

    #[test]
    fn test_cli_parses_gateway_port_and_global_config() {
        let cli =
            Cli::try_parse_from(["databot", "gateway", "--port", "9000", "-c", "/tmp/c.json"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        assert!(matches!(
            cli.command,
            Some(Commands::Gateway { port: Some(9000) })
        ));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
