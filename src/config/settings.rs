use super::consensus::ConsensusParams;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

static DEFAULT_NODE_ADDR: &str = "127.0.0.1:5470";

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const DATA_DIR_KEY: &str = "DATA_DIR";

/// Everything a node needs to start. Loaded once and passed down; nothing
/// in the crate reads configuration from globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub node: NodeSettings,
    pub network: NetworkSettings,
    pub consensus: ConsensusParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub listen_addr: String,
    /// Where the sled database lives; `None` keeps the chain in memory
    pub data_dir: Option<PathBuf>,
    pub miner_address: Option<String>,
    pub bootstrap_peers: Vec<String>,
    pub mempool_capacity: usize,
    pub mempool_expiry_secs: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            listen_addr: DEFAULT_NODE_ADDR.to_string(),
            data_dir: None,
            miner_address: None,
            bootstrap_peers: Vec::new(),
            mempool_capacity: 5_000,
            mempool_expiry_secs: 3 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub max_peers: usize,
    pub io_timeout_ms: u64,
    /// How long a session blocks on a read before servicing its outbound queue
    pub poll_interval_ms: u64,
    pub ping_interval_secs: u64,
    pub liveness_timeout_secs: u64,
    pub max_violations: u32,
    pub sync_batch_size: usize,
    pub discovery_interval_secs: u64,
    pub max_frame_bytes: usize,
    pub seen_cache_size: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            max_peers: 8,
            io_timeout_ms: 5_000,
            poll_interval_ms: 200,
            ping_interval_secs: 30,
            liveness_timeout_secs: 120,
            max_violations: 50,
            sync_batch_size: 500,
            discovery_interval_secs: 300,
            max_frame_bytes: 32 * 1024 * 1024,
            seen_cache_size: 20_000,
        }
    }
}

impl NetworkSettings {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }
}

impl Settings {
    /// Reads the optional TOML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let mut settings = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    LedgerError::Config(format!("Failed to read {}: {e}", path.display()))
                })?;
                Settings::from_toml_str(&text)?
            }
            None => Settings::default(),
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Settings> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            self.node.listen_addr = addr;
        }
        if let Ok(addr) = env::var(MINING_ADDRESS_KEY) {
            self.node.miner_address = Some(addr);
        }
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.node.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.consensus.validate()?;
        if self.node.mempool_capacity == 0 {
            return Err(LedgerError::Config(
                "mempool_capacity must be positive".to_string(),
            ));
        }
        if self.network.max_violations == 0 {
            return Err(LedgerError::Config(
                "max_violations must be positive".to_string(),
            ));
        }
        if self.network.sync_batch_size == 0 {
            return Err(LedgerError::Config(
                "sync_batch_size must be positive".to_string(),
            ));
        }
        if self.network.liveness_timeout_secs <= self.network.ping_interval_secs {
            return Err(LedgerError::Config(format!(
                "liveness_timeout_secs ({}) must exceed ping_interval_secs ({})",
                self.network.liveness_timeout_secs, self.network.ping_interval_secs
            )));
        }
        Ok(())
    }

    /// Port component of the listen address, used to name per-node data dirs.
    pub fn node_id_from_addr(&self) -> String {
        match self.node.listen_addr.rsplit(':').next() {
            Some(port) if !port.is_empty() => port.to_string(),
            _ => "default".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.network.sync_batch_size, 500);
        assert_eq!(settings.network.max_violations, 50);
        assert_eq!(settings.node_id_from_addr(), "5470");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [node]
            listen_addr = "0.0.0.0:7000"
            bootstrap_peers = ["10.0.0.2:7000"]

            [consensus]
            initial_difficulty = 8
            genesis_address = "founder"
        "#;
        let settings = Settings::from_toml_str(text).unwrap();

        assert_eq!(settings.node.listen_addr, "0.0.0.0:7000");
        assert_eq!(settings.node.bootstrap_peers, vec!["10.0.0.2:7000"]);
        assert_eq!(settings.node.mempool_capacity, 5_000);
        assert_eq!(settings.consensus.initial_difficulty, 8);
        assert_eq!(settings.consensus.genesis_address, "founder");
        assert_eq!(settings.consensus.retarget_window, 10);
        assert_eq!(settings.network.ping_interval_secs, 30);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = Settings::from_toml_str("[node\nlisten_addr = 3");
        assert!(matches!(result, Err(LedgerError::Config(_))));
    }

    #[test]
    fn test_liveness_must_exceed_ping() {
        let mut settings = Settings::default();
        settings.network.liveness_timeout_secs = 10;
        settings.network.ping_interval_secs = 30;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        fs::write(&path, "[network]\nmax_peers = 3\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.network.max_peers, 3);
    }
}
