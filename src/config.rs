//! Configuration management for ReorgWatch

use crate::error::{ReorgError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Exclusive upper bound on a node's RPC timeout.
pub const MAX_RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_public_node")]
    pub public: NodeConfig,
    #[serde(default = "default_private_node")]
    pub private: NodeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub network: NetworkControlConfig,
}

/// Connection details for one full node's RPC endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub rpc_host: String,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    #[serde(default = "default_rpc_credential")]
    pub rpc_user: String,
    #[serde(default = "default_rpc_credential")]
    pub rpc_password: String,
    #[serde(default)]
    pub use_tls: bool,
    /// Human readable duration, e.g. "5s" or "1500ms".
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl NodeConfig {
    pub fn new(rpc_host: &str) -> Self {
        Self {
            rpc_host: rpc_host.to_string(),
            rpc_port: default_rpc_port(),
            rpc_user: default_rpc_credential(),
            rpc_password: default_rpc_credential(),
            use_tls: false,
            timeout: default_timeout(),
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.rpc_host, self.rpc_port)
    }

    pub fn timeout_duration(&self) -> Result<Duration> {
        humantime::parse_duration(&self.timeout)
            .map_err(|e| ReorgError::Config(format!("Invalid timeout '{}': {}", self.timeout, e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of heights scanned back from the tip per sync call.
    #[serde(default = "default_depth")]
    pub depth: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            depth: default_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkControlConfig {
    /// Address of the public node as seen from the private node.
    #[serde(default = "default_counterpart_peer")]
    pub counterpart_peer: String,
    /// Placeholder peer hidden from peer listings.
    #[serde(default)]
    pub dummy_peer: Option<String>,
}

impl Default for NetworkControlConfig {
    fn default() -> Self {
        Self {
            counterpart_peer: default_counterpart_peer(),
            dummy_peer: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            public: default_public_node(),
            private: default_private_node(),
            database: DatabaseConfig::default(),
            sync: SyncConfig::default(),
            network: NetworkControlConfig::default(),
        }
    }
}

impl Config {
    /// Checks values that would otherwise only fail at first use.
    pub fn validate(&self) -> Result<()> {
        for (label, node) in [("public", &self.public), ("private", &self.private)] {
            if node.rpc_host.trim().is_empty() {
                return Err(ReorgError::Config(format!("{}.rpc_host must be set", label)));
            }
            let timeout = node.timeout_duration()?;
            if timeout.is_zero() || timeout >= MAX_RPC_TIMEOUT {
                return Err(ReorgError::Config(format!(
                    "{}.timeout must be between 0s and {}s, got {}",
                    label,
                    MAX_RPC_TIMEOUT.as_secs(),
                    node.timeout
                )));
            }
        }

        if self.database.path.is_empty() {
            return Err(ReorgError::Config("database.path must be set".to_string()));
        }

        if self.sync.depth == 0 {
            return Err(ReorgError::Config("sync.depth must be at least 1".to_string()));
        }

        if self.network.counterpart_peer.trim().is_empty() {
            return Err(ReorgError::Config(
                "network.counterpart_peer must be set".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn parse_config(config_str: &str) -> Result<Config> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from `path`, falling back to defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }

    let config_str = fs::read_to_string(path)
        .map_err(|e| ReorgError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    parse_config(&config_str)
}

fn default_public_node() -> NodeConfig {
    NodeConfig::new("faucet-litecoind-public")
}

fn default_private_node() -> NodeConfig {
    NodeConfig::new("faucet-litecoind-private")
}

fn default_rpc_port() -> u16 {
    19332
}

fn default_rpc_credential() -> String {
    "admin".to_string()
}

fn default_timeout() -> String {
    "5s".to_string()
}

fn default_database_path() -> String {
    "./data/reorg.db".to_string()
}

fn default_depth() -> u64 {
    100
}

fn default_counterpart_peer() -> String {
    "faucet-litecoind-public:19335".to_string()
}
