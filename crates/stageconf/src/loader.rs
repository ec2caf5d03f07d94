//! Config file discovery, loading, and environment variable overlay.

use crate::infra::check_response_timeout_ms;
use crate::{ConfigError, StageConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/stagehand/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("stagehand/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        let path = expand_path(&path.to_string_lossy());
        if path.exists() {
            files.push(path);
            return files;
        }
    }

    let local = PathBuf::from("stagehand.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and apply the keys it sets onto `config`.
pub fn apply_file(config: &mut StageConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Apply the keys present in a TOML document onto `config`.
///
/// Keys that are absent leave the current value alone, so files layer
/// without resetting what an earlier file set.
fn apply_toml(config: &mut StageConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let port = |value: &toml::Value, key: &str| -> Result<u16, ConfigError> {
        value
            .as_integer()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| ConfigError::Parse {
                path: path.to_path_buf(),
                message: format!("{} must be a port number (0-65535)", key),
            })
    };

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("host").and_then(|v| v.as_str()) {
            config.bind.host = v.to_string();
        }
        if let Some(v) = bind.get("port") {
            config.bind.port = port(v, "bind.port")?;
        }
    }

    if let Some(peer) = table.get("peer").and_then(|v| v.as_table()) {
        if let Some(v) = peer.get("host").and_then(|v| v.as_str()) {
            config.peer.host = v.to_string();
        }
        if let Some(v) = peer.get("command_port") {
            config.peer.command_port = port(v, "peer.command_port")?;
        }
        if let Some(v) = peer.get("reply_port") {
            config.peer.reply_port = port(v, "peer.reply_port")?;
        }
    }

    if let Some(timing) = table.get("timing").and_then(|v| v.as_table()) {
        if let Some(v) = timing.get("response_timeout_ms") {
            let ms = v
                .as_integer()
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: "timing.response_timeout_ms must be a positive integer".to_string(),
                })?;
            config.timing.response_timeout_ms =
                check_response_timeout_ms(ms).map_err(|message| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: format!("timing.response_timeout_ms: {}", message),
                })?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            config.telemetry.otlp_endpoint = Some(v.to_string());
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
///
/// The `OSC_*` names are the ones the daemon has always documented; they are
/// kept so existing launch scripts keep working.
///
/// Unparseable numbers are ignored; an out-of-range response timeout is an
/// error.
pub fn apply_env_overrides(
    config: &mut StageConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    if let Ok(v) = env::var("OSC_SOCKET_HOST") {
        config.bind.host = v;
        sources.env_overrides.push("OSC_SOCKET_HOST".to_string());
    }
    if let Some(port) = env_parse("OSC_SOCKET_PORT") {
        config.bind.port = port;
        sources.env_overrides.push("OSC_SOCKET_PORT".to_string());
    }

    if let Ok(v) = env::var("OSC_ABLETON_HOST") {
        config.peer.host = v;
        sources.env_overrides.push("OSC_ABLETON_HOST".to_string());
    }
    if let Some(port) = env_parse("OSC_ABLETON_PORT") {
        config.peer.command_port = port;
        sources.env_overrides.push("OSC_ABLETON_PORT".to_string());
    }
    if let Some(port) = env_parse("OSC_RECEIVE_PORT") {
        config.peer.reply_port = port;
        sources.env_overrides.push("OSC_RECEIVE_PORT".to_string());
    }

    if let Some(ms) = env_parse("OSC_RESPONSE_TIMEOUT_MS") {
        config.timing.response_timeout_ms =
            check_response_timeout_ms(ms).map_err(|message| ConfigError::Env {
                var: "OSC_RESPONSE_TIMEOUT_MS",
                message,
            })?;
        sources.env_overrides.push("OSC_RESPONSE_TIMEOUT_MS".to_string());
    }

    if let Ok(v) = env::var("STAGEHAND_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        sources.env_overrides.push("STAGEHAND_OTLP_ENDPOINT".to_string());
    }
    // Also support standard OTEL env var
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("STAGEHAND_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("STAGEHAND_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    Ok(())
}

/// Parse an env var, ignoring values that don't parse.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_VARS: &[&str] = &[
        "OSC_SOCKET_HOST",
        "OSC_SOCKET_PORT",
        "OSC_ABLETON_HOST",
        "OSC_ABLETON_PORT",
        "OSC_RECEIVE_PORT",
        "OSC_RESPONSE_TIMEOUT_MS",
        "STAGEHAND_OTLP_ENDPOINT",
        "OTEL_EXPORTER_OTLP_ENDPOINT",
        "STAGEHAND_LOG_LEVEL",
        "RUST_LOG",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let mut config = StageConfig::default();
        apply_toml(
            &mut config,
            "[peer]\ncommand_port = 9000\n",
            Path::new("test.toml"),
        )
        .unwrap();
        assert_eq!(config.peer.command_port, 9000);
        // Other values should be defaults
        assert_eq!(config.peer.reply_port, 11001);
        assert_eq!(config.bind.port, 65432);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[bind]
host = "0.0.0.0"
port = 7000

[peer]
host = "192.168.1.20"
command_port = 12000
reply_port = 12001

[timing]
response_timeout_ms = 250

[telemetry]
log_level = "debug"
otlp_endpoint = "127.0.0.1:4317"
"#;
        let mut config = StageConfig::default();
        apply_toml(&mut config, toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.bind.addr(), "0.0.0.0:7000");
        assert_eq!(config.peer.command_addr(), "192.168.1.20:12000");
        assert_eq!(config.peer.reply_port, 12001);
        assert_eq!(config.timing.response_timeout_ms, 250);
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(
            config.telemetry.otlp_endpoint.as_deref(),
            Some("127.0.0.1:4317")
        );
    }

    #[test]
    fn test_later_file_only_overrides_keys_it_sets() {
        let mut config = StageConfig::default();
        apply_toml(&mut config, "[bind]\nport = 7000\n", Path::new("a.toml")).unwrap();
        apply_toml(&mut config, "[peer]\nhost = \"live\"\n", Path::new("b.toml")).unwrap();

        assert_eq!(config.bind.port, 7000);
        assert_eq!(config.peer.host, "live");
    }

    #[test]
    fn test_out_of_range_port_is_rejected() {
        let mut config = StageConfig::default();
        let err = apply_toml(&mut config, "[bind]\nport = 70000\n", Path::new("bad.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("bind.port"));
    }

    #[test]
    fn test_response_timeout_out_of_range_in_file() {
        for bad in ["0", "3600001", "9223372036854775807"] {
            let mut config = StageConfig::default();
            let toml = format!("[timing]\nresponse_timeout_ms = {}\n", bad);
            let err = apply_toml(&mut config, &toml, Path::new("bad.toml")).unwrap_err();
            assert!(matches!(err, ConfigError::Parse { .. }), "{}", bad);
            assert!(err.to_string().contains("response_timeout_ms"));
        }
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let mut config = StageConfig::default();
        let err = apply_toml(&mut config, "[bind\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_apply_file_missing_is_read_error() {
        let mut config = StageConfig::default();
        let err = apply_file(&mut config, Path::new("/nonexistent/stagehand.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    #[serial]
    fn test_cli_path_is_loaded() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timing]\nresponse_timeout_ms = 1234").unwrap();

        let (config, sources) = StageConfig::load_with_sources_from(Some(file.path())).unwrap();
        assert_eq!(config.timing.response_timeout_ms, 1234);
        assert!(sources.files.iter().any(|p| p == file.path()));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("OSC_SOCKET_PORT", "7777");
        env::set_var("OSC_ABLETON_HOST", "10.0.0.5");
        env::set_var("OSC_RECEIVE_PORT", "not-a-port");

        let mut config = StageConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides(&mut config, &mut sources).unwrap();
        clear_env();

        assert_eq!(config.bind.port, 7777);
        assert_eq!(config.peer.host, "10.0.0.5");
        // Unparseable values are ignored
        assert_eq!(config.peer.reply_port, 11001);
        assert_eq!(
            sources.env_overrides,
            vec!["OSC_SOCKET_PORT".to_string(), "OSC_ABLETON_HOST".to_string()]
        );
    }

    #[test]
    #[serial]
    fn test_env_response_timeout_out_of_range() {
        for bad in ["0", "18446744073709551615"] {
            clear_env();
            env::set_var("OSC_RESPONSE_TIMEOUT_MS", bad);

            let mut config = StageConfig::default();
            let mut sources = ConfigSources::default();
            let result = apply_env_overrides(&mut config, &mut sources);
            clear_env();

            let err = result.unwrap_err();
            assert!(matches!(err, ConfigError::Env { .. }), "{}", bad);
            assert!(err.to_string().contains("OSC_RESPONSE_TIMEOUT_MS"));
        }
    }

    #[test]
    #[serial]
    fn test_env_response_timeout_in_range() {
        clear_env();
        env::set_var("OSC_RESPONSE_TIMEOUT_MS", "750");

        let mut config = StageConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides(&mut config, &mut sources).unwrap();
        clear_env();

        assert_eq!(config.timing.response_timeout_ms, 750);
    }

    #[test]
    #[serial]
    fn test_env_beats_file() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[peer]\ncommand_port = 12000").unwrap();
        env::set_var("OSC_ABLETON_PORT", "13000");

        let (config, _) = StageConfig::load_with_sources_from(Some(file.path())).unwrap();
        clear_env();

        assert_eq!(config.peer.command_port, 13000);
    }
}
