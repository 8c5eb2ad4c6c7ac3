//! Daemon configuration: `~/.jacques/config.toml` plus environment overrides.
//!
//! A missing file yields defaults. An unreadable or invalid file is reported to
//! the caller, which logs it and falls back to defaults.

use jacques_protocol::{DATA_DIR_NAME, MAX_LINE_BYTES, SOCKET_ENV, SOCKET_NAME};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "config.toml";
pub const PORT_ENV: &str = "JACQUES_PORT";
pub const FOCUS_WATCHER_ENV: &str = "JACQUES_FOCUS_WATCHER";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: Option<PathBuf>,
    pub claude_settings_path: Option<PathBuf>,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    pub broadcast: BroadcastConfig,
    pub focus: FocusConfig,
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub idle_timeout_ms: u64,
    pub max_line_bytes: usize,
    pub max_connections: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 5_000,
            max_line_bytes: MAX_LINE_BYTES,
            max_connections: 64,
        }
    }
}

impl IngestConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 4243,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BroadcastConfig {
    pub client_queue_capacity: usize,
    pub command_queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            client_queue_capacity: 256,
            command_queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FocusConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 500,
        }
    }
}

impl FocusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    pub max_age_secs: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { max_age_secs: 300 }
    }
}

/// Fully resolved runtime settings: paths made absolute, overrides applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub socket_path: PathBuf,
    pub pending_events_path: PathBuf,
    pub claude_settings_path: PathBuf,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    pub broadcast: BroadcastConfig,
    pub focus: FocusConfig,
    pub replay: ReplayConfig,
}

pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(home.join(DATA_DIR_NAME))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(data_dir()?.join(CONFIG_FILE_NAME))
}

pub fn load_config(path: &Path) -> Result<DaemonConfig, ConfigError> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<DaemonConfig>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl DaemonConfig {
    /// Applies environment overrides and fills default paths relative to `home`.
    pub fn resolve<F>(self, home: &Path, env: F) -> ResolvedConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = home.join(DATA_DIR_NAME);

        let socket_path = env(SOCKET_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .or(self.socket_path)
            .unwrap_or_else(|| data_dir.join(SOCKET_NAME));

        let mut server = self.server;
        if let Some(value) = env(PORT_ENV) {
            match value.trim().parse::<u16>() {
                Ok(port) => server.port = port,
                Err(_) => warn!(value = %value, "Ignoring invalid {}", PORT_ENV),
            }
        }

        let mut focus = self.focus;
        if let Some(value) = env(FOCUS_WATCHER_ENV) {
            if matches!(value.as_str(), "0" | "false" | "FALSE" | "no" | "NO") {
                focus.enabled = false;
            }
        }

        let claude_settings_path = self
            .claude_settings_path
            .unwrap_or_else(|| home.join(".claude").join("settings.json"));

        ResolvedConfig {
            pending_events_path: data_dir.join(jacques_protocol::PENDING_EVENTS_FILE),
            socket_path,
            claude_settings_path,
            ingest: self.ingest,
            server,
            broadcast: self.broadcast,
            focus,
            replay: self.replay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&temp_dir.path().join("missing.toml")).expect("load config");
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.ingest.idle_timeout_ms, 5_000);
        assert_eq!(config.server.port, 4243);
        assert_eq!(config.broadcast.client_queue_capacity, 256);
    }

    #[test]
    fn load_config_parses_partial_tables() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[server]
port = 5000

[focus]
enabled = false

[broadcast]
client_queue_capacity = 8
"#,
        )
        .expect("write config");

        let config = load_config(&path).expect("load config");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(!config.focus.enabled);
        assert_eq!(config.focus.poll_interval_ms, 500);
        assert_eq!(config.broadcast.client_queue_capacity, 8);
        assert_eq!(config.broadcast.command_queue_capacity, 1024);
    }

    #[test]
    fn load_config_reports_invalid_toml() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[server\nport = ").expect("write config");
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn resolve_uses_home_relative_defaults() {
        let home = Path::new("/home/dev");
        let resolved = DaemonConfig::default().resolve(home, env_from(&[]));
        assert_eq!(resolved.socket_path, home.join(".jacques").join("daemon.sock"));
        assert_eq!(
            resolved.pending_events_path,
            home.join(".jacques").join("pending-events.jsonl")
        );
        assert_eq!(
            resolved.claude_settings_path,
            home.join(".claude").join("settings.json")
        );
        assert!(resolved.focus.enabled);
    }

    #[test]
    fn resolve_applies_env_overrides() {
        let resolved = DaemonConfig::default().resolve(
            Path::new("/home/dev"),
            env_from(&[
                ("JACQUES_SOCKET", "/tmp/j.sock"),
                ("JACQUES_PORT", "6001"),
                ("JACQUES_FOCUS_WATCHER", "0"),
            ]),
        );
        assert_eq!(resolved.socket_path, PathBuf::from("/tmp/j.sock"));
        assert_eq!(resolved.server.port, 6001);
        assert!(!resolved.focus.enabled);
    }

    #[test]
    fn resolve_ignores_bad_port() {
        let resolved = DaemonConfig::default()
            .resolve(Path::new("/home/dev"), env_from(&[("JACQUES_PORT", "nope")]));
        assert_eq!(resolved.server.port, 4243);
    }
}
