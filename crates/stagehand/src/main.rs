//! stagehand daemon entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stageconf::StageConfig;
use stagehand::{telemetry, Daemon, DaemonConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(about = "Correlating OSC bridge between tool servers and Ableton Live")]
#[command(version)]
struct Cli {
    /// Config file (default: ./stagehand.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to accept client connections on
    #[arg(long)]
    socket_host: Option<String>,

    /// Port to accept client connections on
    #[arg(long)]
    socket_port: Option<u16>,

    /// Host running AbletonOSC
    #[arg(long)]
    ableton_host: Option<String>,

    /// Port AbletonOSC listens on
    #[arg(long)]
    ableton_port: Option<u16>,

    /// Port AbletonOSC sends replies to
    #[arg(long)]
    receive_port: Option<u16>,

    /// How long to wait for a reply, in milliseconds
    #[arg(long, value_parser = parse_timeout_ms)]
    timeout_ms: Option<u64>,

    /// OTLP gRPC endpoint for traces and logs
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn parse_timeout_ms(raw: &str) -> Result<u64, String> {
    let ms: u64 = raw.parse().map_err(|e| format!("{}", e))?;
    stageconf::check_response_timeout_ms(ms)
}

impl Cli {
    /// Flags win over files and environment.
    fn apply(&self, config: &mut StageConfig) {
        if let Some(host) = &self.socket_host {
            config.bind.host = host.clone();
        }
        if let Some(port) = self.socket_port {
            config.bind.port = port;
        }
        if let Some(host) = &self.ableton_host {
            config.peer.host = host.clone();
        }
        if let Some(port) = self.ableton_port {
            config.peer.command_port = port;
        }
        if let Some(port) = self.receive_port {
            config.peer.reply_port = port;
        }
        if let Some(ms) = self.timeout_ms {
            config.timing.response_timeout_ms = ms;
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            config.telemetry.otlp_endpoint = Some(endpoint.clone());
        }
        if self.verbose {
            config.telemetry.log_level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = StageConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    cli.apply(&mut config);

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let _telemetry = telemetry::init(&config.telemetry)?;

    for file in &sources.files {
        info!(path = %file.display(), "Loaded config file");
    }
    for var in &sources.env_overrides {
        info!(var = %var, "Applied environment override");
    }

    let daemon = Daemon::start(DaemonConfig::from(&config))
        .await
        .context("Failed to start daemon")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    daemon.run(shutdown).await?;
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = sigterm() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_flag_accepts_in_range() {
        let cli = Cli::try_parse_from(["stagehand", "--timeout-ms", "250"]).unwrap();
        assert_eq!(cli.timeout_ms, Some(250));
    }

    #[test]
    fn test_timeout_flag_rejects_zero_and_oversized() {
        for bad in ["0", "3600001", "18446744073709551615", "-5"] {
            assert!(
                Cli::try_parse_from(["stagehand", "--timeout-ms", bad]).is_err(),
                "{}",
                bad
            );
        }
    }
}
