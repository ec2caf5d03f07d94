//! Minimal configuration loading for stagehand.
//!
//! Every setting has a compiled default that matches a stock AbletonOSC
//! install, so the daemon runs with no config file at all.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/stagehand/config.toml` (system)
//! 2. `~/.config/stagehand/config.toml` (user)
//! 3. `./stagehand.toml` (local override, or the `--config` path)
//! 4. Environment variables (`OSC_*`, `STAGEHAND_*`)
//!
//! Command-line flags are applied on top by the binaries.
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! host = "127.0.0.1"
//! port = 65432
//!
//! [peer]
//! host = "127.0.0.1"
//! command_port = 11000
//! reply_port = 11001
//!
//! [timing]
//! response_timeout_ms = 5000
//!
//! [telemetry]
//! log_level = "info"
//! otlp_endpoint = "127.0.0.1:4317"
//! ```

pub mod infra;
pub mod loader;

pub use infra::{
    check_response_timeout_ms, resolve, BindConfig, PeerConfig, TelemetryConfig, TimingConfig,
    MAX_RESPONSE_TIMEOUT_MS,
};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value in {var}: {message}")]
    Env { var: &'static str, message: String },
}

/// Complete stagehand configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StageConfig {
    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub peer: PeerConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl StageConfig {
    /// Load configuration from all sources and report where values came from.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/stagehand/config.toml`
    /// 3. `~/.config/stagehand/config.toml`
    /// 4. `./stagehand.toml`, or `config_path` when given
    /// 5. Environment variables
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = StageConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources)?;

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# stagehand configuration\n\n");

        output.push_str("[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.bind.host));
        output.push_str(&format!("port = {}\n", self.bind.port));

        output.push_str("\n[peer]\n");
        output.push_str(&format!("host = \"{}\"\n", self.peer.host));
        output.push_str(&format!("command_port = {}\n", self.peer.command_port));
        output.push_str(&format!("reply_port = {}\n", self.peer.reply_port));

        output.push_str("\n[timing]\n");
        output.push_str(&format!(
            "response_timeout_ms = {}\n",
            self.timing.response_timeout_ms
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));
        if let Some(endpoint) = &self.telemetry.otlp_endpoint {
            output.push_str(&format!("otlp_endpoint = \"{}\"\n", endpoint));
        }

        output
    }
}
