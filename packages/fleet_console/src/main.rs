use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::prelude::*;

mod assistant;
mod cli;
mod config;
mod credential;

use crate::config::FleetConfig;

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Live console for the fleet dashboard's push channels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom config directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open every dashboard channel and log a summary until Ctrl-C
    Watch(WatchArgs),

    /// Send one message to the assistant and print the conversation
    Chat(ChatArgs),

    /// Print the effective configuration
    Config,
}

#[derive(Parser)]
struct WatchArgs {
    /// Also follow this assistant conversation (repeatable)
    #[arg(long = "conversation")]
    conversations: Vec<String>,

    /// Seconds between summary lines
    #[arg(long, default_value = "15")]
    interval: u64,
}

#[derive(Parser)]
struct ChatArgs {
    /// Existing conversation id (a new one is created when omitted)
    #[arg(long)]
    conversation: Option<String>,

    /// Message text
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "fleet=debug,push_channel=debug,fleet_state=debug,info"
    } else {
        "fleet=info,push_channel=info,fleet_state=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = FleetConfig::new(cli.config_dir)?;
    debug!(path = %config.config_path().display(), "configuration loaded");

    match cli.command {
        Commands::Watch(args) => {
            cli::watch::watch_command(
                &config,
                &args.conversations,
                Duration::from_secs(args.interval),
            )
            .await
        }
        Commands::Chat(args) => {
            cli::chat::chat_command(&config, args.conversation, &args.message).await
        }
        Commands::Config => cli::config_command(&config),
    }
}
