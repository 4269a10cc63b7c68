use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quarry_chain::{ConsensusParams, MAX_DIFFICULTY};

pub const DEFAULT_P2P_LISTEN: &str = "127.0.0.1:3000";
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Node settings. Every field has a default, so an empty file (or no file at
/// all) yields a standalone node on the default port.
///
/// ```toml
/// p2p_listen = "0.0.0.0:3000"
/// api_listen = "127.0.0.1:8080"
/// peers = ["10.0.0.2:3000"]
/// data_dir = "./data"
///
/// [consensus]
/// difficulty = 4
/// block_reward = 50
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub p2p_listen: String,
    /// HTTP API address; the API is disabled when unset.
    pub api_listen: Option<SocketAddr>,
    /// Peers dialed at startup.
    pub peers: Vec<String>,
    /// Chain persistence directory; the chain lives in memory when unset.
    pub data_dir: Option<PathBuf>,
    pub dial_timeout_ms: u64,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    pub consensus: ConsensusParams,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            p2p_listen: DEFAULT_P2P_LISTEN.to_string(),
            api_listen: None,
            peers: Vec::new(),
            data_dir: None,
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            consensus: ConsensusParams::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consensus.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "difficulty {} exceeds {MAX_DIFFICULTY}",
                self.consensus.difficulty
            )));
        }
        if self.consensus.block_reward == 0 {
            return Err(ConfigError::Invalid("block_reward must be positive".into()));
        }
        if self.p2p_listen.trim().is_empty() {
            return Err(ConfigError::Invalid("p2p_listen is empty".into()));
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.p2p_listen, "127.0.0.1:3000");
        assert_eq!(config.dial_timeout(), Duration::from_secs(5));
        assert_eq!(config.consensus, ConsensusParams::new(4, 50));
    }

    #[test]
    fn parses_every_field() {
        let config = NodeConfig::from_toml_str(
            r#"
            p2p_listen = "0.0.0.0:4000"
            api_listen = "127.0.0.1:8080"
            peers = ["10.0.0.2:3000", "10.0.0.3:3000"]
            data_dir = "/var/lib/quarry"
            dial_timeout_ms = 250
            log_filter = "debug"

            [consensus]
            difficulty = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.p2p_listen, "0.0.0.0:4000");
        assert_eq!(config.api_listen, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/quarry")));
        assert_eq!(config.dial_timeout(), Duration::from_millis(250));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.consensus, ConsensusParams::new(2, 50));
    }

    #[test]
    fn rejects_unusable_values() {
        assert!(matches!(
            NodeConfig::from_toml_str("[consensus]\ndifficulty = 65"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NodeConfig::from_toml_str("[consensus]\nblock_reward = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            NodeConfig::from_toml_str("peers = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            NodeConfig::load(&path),
            Err(ConfigError::Io { .. })
        ));

        std::fs::write(&path, "dial_timeout_ms = 10\n").unwrap();
        assert_eq!(NodeConfig::load(&path).unwrap().dial_timeout_ms, 10);
    }
}
