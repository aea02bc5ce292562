//! Command configuration.
//!
//! An optional TOML file with `[server]` and `[client]` tables. Every key
//! has a default, so a partial file (or none at all) is valid. Command-line
//! flags are applied on top by `main`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use blockfetch_protocol::{DEFAULT_BLOCK_SIZE, DEFAULT_PORT, DEFAULT_WINDOW_SIZE};
use blockfetch_server::ServerConfig;
use blockfetch_transfer::{FetchConfig, FetchStrategy, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub client: ClientSection,
}

/// `[server]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Address to listen on.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// File to serve.
    #[serde(default = "default_served_file")]
    pub file: PathBuf,

    /// Longest range a client may request.
    #[serde(default = "default_block_size")]
    pub max_block_size: u64,
}

/// `[client]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    /// Server to fetch from.
    #[serde(default = "default_server")]
    pub server: SocketAddr,

    /// Destination path.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Concurrent block workers.
    #[serde(default = "default_window_size")]
    pub window_size: u64,

    #[serde(default)]
    pub strategy: FetchStrategy,

    /// Per-attempt timeout for block requests.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// Attempts per block before the transfer fails (0 = unlimited).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-attempt timeout for the size probe.
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

fn default_bind() -> SocketAddr {
    ([0, 0, 0, 0], DEFAULT_PORT).into()
}

fn default_served_file() -> PathBuf {
    PathBuf::from("bible.txt")
}

fn default_server() -> SocketAddr {
    ([127, 0, 0, 1], DEFAULT_PORT).into()
}

fn default_output() -> PathBuf {
    PathBuf::from("file.txt")
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_window_size() -> u64 {
    DEFAULT_WINDOW_SIZE
}

fn default_block_timeout_ms() -> u64 {
    RetryPolicy::block_fetch().timeout.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    RetryPolicy::block_fetch().max_attempts.unwrap_or(0)
}

fn default_discovery_timeout_ms() -> u64 {
    RetryPolicy::size_discovery().timeout.as_millis() as u64
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            file: default_served_file(),
            max_block_size: default_block_size(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server: default_server(),
            output: default_output(),
            block_size: default_block_size(),
            window_size: default_window_size(),
            strategy: FetchStrategy::default(),
            block_timeout_ms: default_block_timeout_ms(),
            max_attempts: default_max_attempts(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

impl Config {
    /// Reads `path`, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

impl ServerSection {
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            file: self.file.clone(),
            max_block_size: self.max_block_size,
        }
    }
}

impl ClientSection {
    pub fn to_fetch_config(&self) -> FetchConfig {
        let defaults = FetchConfig::default();
        FetchConfig {
            block_size: self.block_size,
            window_size: self.window_size,
            strategy: self.strategy,
            block_retry: RetryPolicy {
                timeout: Duration::from_millis(self.block_timeout_ms),
                max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
                ..defaults.block_retry
            },
            discovery_retry: RetryPolicy {
                timeout: Duration::from_millis(self.discovery_timeout_ms),
                ..defaults.discovery_retry
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:9991".parse::<SocketAddr>().unwrap());
        assert_eq!(config.server.file, PathBuf::from("bible.txt"));
        assert_eq!(config.client.server, "127.0.0.1:9991".parse::<SocketAddr>().unwrap());
        assert_eq!(config.client.output, PathBuf::from("file.txt"));
        assert_eq!(config.client.block_size, 1024);
        assert_eq!(config.client.window_size, 50);
        assert_eq!(config.client.strategy, FetchStrategy::Strided);
    }

    #[test]
    fn default_fetch_config_matches_library_default() {
        assert_eq!(
            Config::default().client.to_fetch_config(),
            FetchConfig::default()
        );
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = Config::default();
        config.server.max_block_size = 4096;
        config.client.strategy = FetchStrategy::WorkQueue;
        config.client.max_attempts = 0;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            [client]
            window_size = 8
            strategy = "work-queue"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.client.window_size, 8);
        assert_eq!(config.client.strategy, FetchStrategy::WorkQueue);
        assert_eq!(config.client.block_size, 1024);
        assert_eq!(config.server, ServerSection::default());
    }

    #[test]
    fn zero_max_attempts_means_unlimited() {
        let section = ClientSection {
            max_attempts: 0,
            block_timeout_ms: 250,
            ..ClientSection::default()
        };
        let fetch = section.to_fetch_config();
        assert_eq!(fetch.block_retry.max_attempts, None);
        assert_eq!(fetch.block_retry.timeout, Duration::from_millis(250));
    }

    #[test]
    fn server_section_to_config() {
        let section = ServerSection {
            file: PathBuf::from("/srv/data.bin"),
            ..ServerSection::default()
        };
        let config = section.to_server_config();
        assert_eq!(config.file, PathBuf::from("/srv/data.bin"));
        assert_eq!(config.max_block_size, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("blockfetch.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1:7000\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.client, ClientSection::default());
    }

    #[test]
    fn load_without_path_uses_defaults() {
        assert_eq!(Config::load(None).unwrap(), Config::default());
    }

    #[test]
    fn load_rejects_invalid_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[client\nwindow_size = ").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
