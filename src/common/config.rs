//! Configuration for raftkv nodes
//!
//! A [`Config`] is built once at startup and handed to every component that
//! needs it. Sources are layered: built-in defaults, then an optional file
//! (TOML or YAML), then `RAFTKV_*` environment variables.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub raft: RaftConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage engine selected at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Log-structured segment store
    Kvs,
    /// Volatile in-memory map
    Memory,
}

/// Durability of segment appends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// fsync after every append
    Always,
    /// Flush user-space buffers only
    Flush,
}

/// Client-facing server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Raft node id, must be non-zero
    #[serde(default = "default_node_id")]
    pub node_id: u64,

    /// Listen address for clients and peers
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Directory holding the segment files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Entries held by the read-through cache (0 disables it)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_engine")]
    pub engine: EngineKind,
}

fn default_node_id() -> u64 {
    1
}
fn default_addr() -> String {
    "127.0.0.1:2317".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./nodes/node1")
}
fn default_cache_capacity() -> usize {
    1024
}
fn default_engine() -> EngineKind {
    EngineKind::Kvs
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            addr: default_addr(),
            data_dir: default_data_dir(),
            cache_capacity: default_cache_capacity(),
            engine: default_engine(),
        }
    }
}

/// A cluster member known at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: u64,
    pub addr: String,
}

/// Consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Bootstrap voters other than this node
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Campaign immediately on startup
    #[serde(default)]
    pub bootstrap: bool,

    /// Start passive and wait to be added by the leader
    #[serde(default)]
    pub join: bool,

    /// Logical clock interval
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Ticks without a heartbeat before a follower campaigns
    #[serde(default = "default_election_tick")]
    pub election_tick: usize,

    /// Ticks between leader heartbeats
    #[serde(default = "default_heartbeat_tick")]
    pub heartbeat_tick: usize,

    /// Upper bound on waiting for a proposal to commit
    #[serde(default = "default_proposal_timeout")]
    pub proposal_timeout_ms: u64,

    /// Parent directory for locally provisioned members
    #[serde(default = "default_provision_dir")]
    pub provision_dir: PathBuf,

    /// Applied entries kept in the raft log before a snapshot replaces them
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,
}

fn default_tick_interval() -> u64 {
    100
}
fn default_election_tick() -> usize {
    10
}
fn default_heartbeat_tick() -> usize {
    3
}
fn default_proposal_timeout() -> u64 {
    5_000
}
fn default_provision_dir() -> PathBuf {
    PathBuf::from("./nodes")
}
fn default_snapshot_interval() -> u64 {
    1_000
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            bootstrap: false,
            join: false,
            tick_interval_ms: default_tick_interval(),
            election_tick: default_election_tick(),
            heartbeat_tick: default_heartbeat_tick(),
            proposal_timeout_ms: default_proposal_timeout(),
            provision_dir: default_provision_dir(),
            snapshot_interval: default_snapshot_interval(),
        }
    }
}

impl RaftConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_millis(self.proposal_timeout_ms)
    }
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Stale bytes that trigger an inline compaction
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: u64,

    #[serde(default = "default_sync")]
    pub sync: SyncPolicy,
}

fn default_compaction_threshold() -> u64 {
    1024 * 1024
}
fn default_sync() -> SyncPolicy {
    SyncPolicy::Always
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: default_compaction_threshold(),
            sync: default_sync(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            raft: RaftConfig::default(),
            storage: StorageConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// Environment keys use `__` between sections, e.g.
    /// `RAFTKV_SERVER__ADDR=0.0.0.0:2317`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            let format = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml") | Some("yml") => config::FileFormat::Yaml,
                _ => config::FileFormat::Toml,
            };
            builder = builder.add_source(config::File::from(path).format(format));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RAFTKV")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for a single member with the given identity.
    pub fn for_node(node_id: u64, addr: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.server.node_id = node_id;
        config.server.addr = addr.into();
        config.server.data_dir = data_dir.into();
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.node_id == 0 {
            return Err(Error::InvalidConfig("node_id must be non-zero".into()));
        }
        if self.storage.compaction_threshold == 0 {
            return Err(Error::InvalidConfig(
                "compaction_threshold must be positive".into(),
            ));
        }
        let raft = &self.raft;
        if raft.tick_interval_ms == 0 || raft.election_tick == 0 || raft.heartbeat_tick == 0 {
            return Err(Error::InvalidConfig("raft ticks must be positive".into()));
        }
        if raft.heartbeat_tick >= raft.election_tick {
            return Err(Error::InvalidConfig(
                "heartbeat_tick must be smaller than election_tick".into(),
            ));
        }
        if raft.snapshot_interval == 0 {
            return Err(Error::InvalidConfig(
                "snapshot_interval must be positive".into(),
            ));
        }
        let mut seen = HashSet::new();
        for peer in &raft.peers {
            if peer.id == 0 {
                return Err(Error::InvalidConfig("peer id must be non-zero".into()));
            }
            if !seen.insert(peer.id) {
                return Err(Error::InvalidConfig(format!("duplicate peer id {}", peer.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.addr, "127.0.0.1:2317");
        assert_eq!(config.storage.compaction_threshold, 1024 * 1024);
        assert_eq!(config.raft.proposal_timeout(), Duration::from_secs(5));
        assert_eq!(config.raft.snapshot_interval, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[server]
node_id = 2
addr = "127.0.0.1:2318"
engine = "memory"

[[raft.peers]]
id = 1
addr = "127.0.0.1:2317"
"#
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.node_id, 2);
        assert_eq!(config.server.engine, EngineKind::Memory);
        assert_eq!(config.raft.peers.len(), 1);
        assert_eq!(config.log_level, "debug");
        // untouched sections keep their defaults
        assert_eq!(config.storage.sync, SyncPolicy::Always);
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.yaml");
        std::fs::write(
            &path,
            "server:\n  node_id: 3\nstorage:\n  compaction_threshold: 4096\n  sync: flush\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.node_id, 3);
        assert_eq!(config.storage.compaction_threshold, 4096);
        assert_eq!(config.storage.sync, SyncPolicy::Flush);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.server.node_id = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.raft.peers = vec![
            PeerConfig { id: 2, addr: "a".into() },
            PeerConfig { id: 2, addr: "b".into() },
        ];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.raft.heartbeat_tick = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.raft.snapshot_interval = 0;
        assert!(config.validate().is_err());
    }
}
