//! cue - talk to a running stagehand daemon
//!
//! Subcommands:
//! - `cue ping` - Check the daemon answers
//! - `cue status` - Show daemon status
//! - `cue send <address> [args..]` - Send a raw OSC address
//! - `cue call <tool> [json]` - Invoke a named Live command
//! - `cue tools` - List named commands

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cue::{commands, DaemonClient};

#[derive(Parser)]
#[command(name = "cue")]
#[command(about = "Command-line façade for the stagehand OSC daemon")]
#[command(version)]
struct Cli {
    /// Daemon host
    #[arg(long, env = "ABLETON_DAEMON_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Daemon port
    #[arg(long, env = "ABLETON_DAEMON_PORT", default_value = "65432")]
    port: u16,

    /// Per-call timeout in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the daemon answers
    Ping,

    /// Show daemon status
    Status,

    /// Send a raw OSC address
    Send {
        /// OSC address (e.g., /live/song/get/tempo)
        address: String,

        /// Arguments; parsed as JSON scalars, otherwise sent as strings
        args: Vec<String>,
    },

    /// Invoke a named Live command
    Call {
        /// Tool name (see `cue tools`)
        name: String,

        /// JSON object of parameters
        params: Option<String>,
    },

    /// List named Live commands
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let client = DaemonClient::new(
        format!("{}:{}", cli.host, cli.port),
        Duration::from_millis(cli.timeout_ms),
    );

    match cli.command {
        Commands::Ping => commands::ping(&client).await?,
        Commands::Status => commands::status(&client).await?,
        Commands::Send { address, args } => commands::send(&client, &address, &args).await?,
        Commands::Call { name, params } => {
            commands::call(&client, &name, params.as_deref()).await?
        }
        Commands::Tools => commands::tools(),
    }

    Ok(())
}
