//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::defaults::{
    default_data_dir, default_pseudo_nick, default_server_name, default_upstream_port,
};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bouncer boot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bouncer identity toward clients.
    #[serde(default)]
    pub server: ServerConfig,
    /// Client listener.
    pub listen: ListenConfig,
    /// Where user stores, logs and global settings live.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Hook modules loaded at start-up.
    #[serde(default)]
    pub modules: ModulesConfig,
    /// Administrator account created when no users exist yet.
    pub admin: Option<AdminBootstrap>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Bouncer identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Origin of locally generated numerics (e.g., "bnc.straylight.net").
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Nick clients message to reach the bouncer's control commands.
    #[serde(default = "default_pseudo_nick")]
    pub pseudo_nick: String,
    /// Port used when a user's `set server` omits one.
    #[serde(default = "default_upstream_port")]
    pub default_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            pseudo_nick: default_pseudo_nick(),
            default_port: default_upstream_port(),
        }
    }
}

/// Client listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to accept client connections on.
    pub address: SocketAddr,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `system.toml`, `users/` and `logs/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Hook module configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModulesConfig {
    /// Built-in modules to load, in interception order.
    #[serde(default)]
    pub load: Vec<String>,
}

/// First administrator account.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminBootstrap {
    /// Login name.
    pub name: String,
    /// Initial password (hashed before it is stored).
    pub password: String,
}
