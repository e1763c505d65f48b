//! Agent command handlers (single message + interactive mode).

use std::io::{self, BufRead, Write};

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use databot::agent::AgentLoop;
use databot::bus::{InboundMessage, StreamEvent, StreamEventKind};
use databot::config::Config;

use super::common::{build_components, warn_missing_api_key};

pub(crate) async fn cmd_agent(
    config: Config,
    message: Option<String>,
    chat_id: &str,
    stream: bool,
) -> Result<()> {
    warn_missing_api_key(&config);
    let components = build_components(&config).await?;
    components.connectors.connect_all().await;
    let agent = components.agent;

    let result = match message {
        Some(msg) => run_once(&agent, &msg, chat_id, stream).await,
        None => run_interactive(&agent, chat_id, stream).await,
    };

    agent.sessions().flush_all().await?;
    components.connectors.disconnect_all().await;
    result
}

async fn run_once(agent: &AgentLoop, message: &str, chat_id: &str, stream: bool) -> Result<()> {
    if !stream {
        return match agent.process_direct(message, chat_id).await {
            Ok(reply) => {
                println!("{}", reply);
                Ok(())
            }
            Err(e) => bail!("{}", e),
        };
    }

    let inbound = InboundMessage::new("cli", "user", chat_id, message).streaming();
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.kind {
                StreamEventKind::Delta { text } => {
                    print!("{}", text);
                    let _ = io::stdout().flush();
                }
                StreamEventKind::ToolStart { tool_name, .. } => {
                    eprintln!("\n[{}] running...", tool_name);
                }
                StreamEventKind::ToolResult { .. } => {}
                StreamEventKind::Done { .. } | StreamEventKind::Error { .. } => break,
            }
        }
        println!();
    });

    let outcome = agent.process_stream(&inbound, &tx).await;
    drop(tx);
    let _ = printer.await;
    outcome?;
    Ok(())
}

async fn run_interactive(agent: &AgentLoop, chat_id: &str, stream: bool) -> Result<()> {
    println!("databot interactive mode. Type 'exit' or press Ctrl+D to quit.");
    println!();

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        if let Err(e) = run_once(agent, input, chat_id, stream).await {
            eprintln!("Error: {}", e);
        }
        println!();
    }
    Ok(())
}
