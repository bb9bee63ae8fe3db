// Configuration management for the onionnet CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/onionnet/config.json
// - Linux: ~/.config/onionnet/config.json
// - Windows: %APPDATA%\onionnet\config.json
//
// `--config <path>` points at any other file.

use anyhow::{Context, Result};
use onionnet_core::NodeId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_HOPS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interface every process binds to and advertises
    pub host: String,

    /// Port of the registry (directory service)
    pub registry_port: u16,

    /// Relay `n` listens on `base_relay_port + n`
    pub base_relay_port: u16,

    /// User `n` listens on `base_user_port + n`
    pub base_user_port: u16,

    /// Relays per circuit
    pub circuit_hops: usize,

    /// Timeout for each outgoing HTTP request, in seconds
    pub request_timeout_secs: u64,

    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            registry_port: 8080,
            base_relay_port: 4000,
            base_user_port: 3000,
            circuit_hops: onionnet_core::DEFAULT_CIRCUIT_HOPS,
            request_timeout_secs: 5,
            path: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("onionnet");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load from `path`, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load_from(&Self::config_file()?),
        }
    }

    /// Load config from file, or create default if not exists
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            let mut config = Config::default();
            config.path = Some(path.to_path_buf());
            config.save()?;
            config
        };
        config.path = Some(path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    /// Save config to the file it was loaded from
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.circuit_hops < MIN_HOPS {
            anyhow::bail!("circuit_hops must be at least {}", MIN_HOPS);
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        Ok(())
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "host" => {
                if value.is_empty() {
                    anyhow::bail!("Host must not be empty");
                }
                self.host = value.to_string();
            }
            "registry_port" => {
                self.registry_port = value.parse().context("Invalid port number")?;
            }
            "base_relay_port" => {
                self.base_relay_port = value.parse().context("Invalid port number")?;
            }
            "base_user_port" => {
                self.base_user_port = value.parse().context("Invalid port number")?;
            }
            "circuit_hops" => {
                let hops: usize = value.parse().context("Invalid number")?;
                if hops < MIN_HOPS {
                    anyhow::bail!("circuit_hops must be at least {}", MIN_HOPS);
                }
                self.circuit_hops = hops;
            }
            "request_timeout_secs" => {
                let secs: u64 = value.parse().context("Invalid number")?;
                if secs == 0 {
                    anyhow::bail!("request_timeout_secs must be positive");
                }
                self.request_timeout_secs = secs;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.save()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "host" => Some(self.host.clone()),
            "registry_port" => Some(self.registry_port.to_string()),
            "base_relay_port" => Some(self.base_relay_port.to_string()),
            "base_user_port" => Some(self.base_user_port.to_string()),
            "circuit_hops" => Some(self.circuit_hops.to_string()),
            "request_timeout_secs" => Some(self.request_timeout_secs.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("host".to_string(), self.host.clone()),
            ("registry_port".to_string(), self.registry_port.to_string()),
            ("base_relay_port".to_string(), self.base_relay_port.to_string()),
            ("base_user_port".to_string(), self.base_user_port.to_string()),
            ("circuit_hops".to_string(), self.circuit_hops.to_string()),
            ("request_timeout_secs".to_string(), format!("{}s", self.request_timeout_secs)),
        ]
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `host:port` of the registry
    pub fn registry_address(&self) -> String {
        format!("{}:{}", self.host, self.registry_port)
    }

    pub fn relay_port(&self, relay_id: NodeId) -> Result<u16> {
        offset_port(self.base_relay_port, relay_id)
    }

    pub fn user_port(&self, user_id: NodeId) -> Result<u16> {
        offset_port(self.base_user_port, user_id)
    }

    pub fn socket_addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, port))
    }
}

fn offset_port(base: u16, id: NodeId) -> Result<u16> {
    u64::from(base)
        .checked_add(id)
        .and_then(|port| u16::try_from(port).ok())
        .with_context(|| format!("Id {} puts the port past 65535 (base {})", id, base))
}
