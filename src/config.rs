//! Service configuration
//!
//! Loaded from YAML with every section optional; missing values take the
//! defaults below.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{ClientInfo, Configuration};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub server: ServerConfig,
    pub guacd: GuacdConfig,
    pub tunnel: TunnelConfig,
    pub client: ClientInfo,
    pub connections: HashMap<String, ConnectionConfig>,
    pub default_connection: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            path: "/tunnel".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuacdConfig {
    pub host: String,
    pub port: u16,
    pub io_timeout_ms: u64,
}

impl Default for GuacdConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4822,
            io_timeout_ms: 15000,
        }
    }
}

impl GuacdConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub idle_timeout_ms: u64,
    pub reap_interval_ms: u64,
    pub write_chunk_size: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 15000,
            reap_interval_ms: 1000,
            write_chunk_size: 8192,
        }
    }
}

impl TunnelConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }
}

/// A remote desktop clients may connect to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub protocol: String,
    pub parameters: HashMap<String, String>,
    /// Opcodes never relayed from guacd to the client.
    pub block_read: Vec<String>,
    /// Opcodes never relayed from the client to guacd.
    ///
    /// A non-empty list parses every write chunk into whole instructions.
    /// A chunk that ends inside an instruction is a protocol error and closes
    /// the tunnel, so this only suits clients whose writes never split an
    /// instruction across `write_chunk_size` or request body frames.
    pub block_write: Vec<String>,
}

impl ConnectionConfig {
    /// Fresh handshake configuration for this connection.
    pub fn to_configuration(&self) -> Configuration {
        Configuration {
            protocol: self.protocol.clone(),
            connection_id: None,
            parameters: self.parameters.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            log_file: None,
            server: ServerConfig::default(),
            guacd: GuacdConfig::default(),
            tunnel: TunnelConfig::default(),
            client: ClientInfo::default(),
            connections: HashMap::new(),
            default_connection: None,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir
                .join(project_name)
                .join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// The connection named `name`, or the default connection if no name
    /// is given.
    pub fn connection(&self, name: Option<&str>) -> Option<(&str, &ConnectionConfig)> {
        let name = name.or(self.default_connection.as_deref())?;
        self.connections
            .get_key_value(name)
            .map(|(name, connection)| (name.as_str(), connection))
    }
}
