//! Infrastructure configuration - sockets, peer addressing, timing, telemetry.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Where the daemon listens for façade connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Host for the TCP listener.
    /// Default: 127.0.0.1
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// TCP port for façade connections.
    /// Default: 65432
    #[serde(default = "BindConfig::default_port")]
    pub port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        65432
    }

    /// `host:port` suitable for `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// The OSC peer (Ableton Live running AbletonOSC).
///
/// The peer listens on `command_port` and sends every reply to `reply_port`
/// on the daemon's host, regardless of the datagram's source port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Host where Live is running.
    /// Default: 127.0.0.1
    #[serde(default = "PeerConfig::default_host")]
    pub host: String,

    /// Port where Live receives OSC.
    /// Default: 11000
    #[serde(default = "PeerConfig::default_command_port")]
    pub command_port: u16,

    /// Port this daemon binds to receive OSC replies.
    /// Default: 11001
    #[serde(default = "PeerConfig::default_reply_port")]
    pub reply_port: u16,
}

impl PeerConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_command_port() -> u16 {
        11000
    }

    fn default_reply_port() -> u16 {
        11001
    }

    /// `host:command_port`, the datagram destination.
    pub fn command_addr(&self) -> String {
        format!("{}:{}", self.host, self.command_port)
    }

    /// Local address to bind for replies. Replies arrive on the same
    /// interface the daemon listens on for façades.
    pub fn reply_bind_addr(&self, bind: &BindConfig) -> String {
        format!("{}:{}", bind.host, self.reply_port)
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            command_port: Self::default_command_port(),
            reply_port: Self::default_reply_port(),
        }
    }
}

/// Longest response timeout accepted, in milliseconds (one hour).
pub const MAX_RESPONSE_TIMEOUT_MS: u64 = 3_600_000;

/// Check a response timeout is between 1 ms and [`MAX_RESPONSE_TIMEOUT_MS`].
pub fn check_response_timeout_ms(ms: u64) -> Result<u64, String> {
    if ms == 0 || ms > MAX_RESPONSE_TIMEOUT_MS {
        return Err(format!(
            "response timeout must be between 1 and {} ms, got {}",
            MAX_RESPONSE_TIMEOUT_MS, ms
        ));
    }
    Ok(ms)
}

/// Request timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long to wait for a reply from Live, in milliseconds.
    /// Default: 5000
    #[serde(default = "TimingConfig::default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl TimingConfig {
    fn default_response_timeout_ms() -> u64 {
        5000
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: Self::default_response_timeout_ms(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or a full EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint. When unset only the console logger is installed.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: None,
        }
    }
}

/// Resolve a `host:port` string, for callers that need a concrete address.
pub fn resolve(addr: &str) -> std::io::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no address for {}", addr),
        )
    })
}
