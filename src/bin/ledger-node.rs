#![forbid(unsafe_code)]
//! Ledger node with an interactive operator console

use clap::Parser;
use colored::*;
use hashledger::cli::{execute, help_text, ConsoleCommand};
use hashledger::config::load_config;
use hashledger::node::Node;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// Address to listen on (overrides network.listen_addr)
    #[arg(long)]
    listen: Option<String>,
    /// Address announced to peers (overrides network.advertise_addr)
    #[arg(long)]
    advertise: Option<String>,
    /// Peer to fetch the chain from at startup; may be repeated
    #[arg(long = "peer")]
    peers: Vec<String>,
    /// Log filter, e.g. `info` or `hashledger=debug` (RUST_LOG wins)
    #[arg(long)]
    log_level: Option<String>,
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(Some(cli.config.as_path()))?;
    if let Some(listen) = cli.listen {
        config.network.listen_addr = listen;
    }
    if let Some(advertise) = cli.advertise {
        config.network.advertise_addr = Some(advertise);
    }
    config.network.bootstrap_peers.extend(cli.peers);
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let node = Node::init(config)?;
    let local = node.start().await?;

    println!("{}", "HashLedger node".bright_cyan().bold());
    println!("Listening on {}. Type 'help' for commands.", local.to_string().bright_white());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt("> ");
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };

        let mut command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{} {}", "Error:".red().bold(), e);
                if matches!(e, hashledger::error::ChainError::UnknownCommand(_)) {
                    println!("{}", help_text());
                }
                continue;
            }
        };

        if let ConsoleCommand::Prompt(pending) = command {
            prompt(pending.text());
            let Some(input) = lines.next_line().await? else {
                break;
            };
            command = match pending.complete(&input) {
                Ok(command) => command,
                Err(e) => {
                    println!("{} {}", "Error:".red().bold(), e);
                    continue;
                }
            };
        }

        if command.is_quit() {
            break;
        }

        match execute(command, &node.network).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                error!("Command failed: {}", e);
                println!("{} {}", "Error:".red().bold(), e);
            }
        }
    }

    info!("Console closed, shutting down");
    node.shutdown().await;
    Ok(())
}
