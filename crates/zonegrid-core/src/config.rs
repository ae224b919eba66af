//! zonegrid.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::ConsistencyMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneGridConfig {
    pub node: NodeConfig,
    pub membership: MembershipConfig,
    pub cache: CacheConfig,
    /// Zones bootstrapped at startup (`IF NOT EXISTS` semantics).
    pub zones: Vec<ZoneConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id: Option<String>,
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            data_dir: PathBuf::from("/var/lib/zonegrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub heartbeat_interval_secs: u64,
    pub dead_timeout_secs: u64,
    pub reap_interval_secs: u64,
    /// Static node list used by standalone mode.
    pub seeds: Vec<SeedNode>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 5,
            dead_timeout_secs: 30,
            reap_interval_secs: 10,
            seeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedNode {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub write_behind: WriteBehindSettings,
}

/// What a write-behind `put` does when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for space, up to the caller's deadline.
    #[default]
    Block,
    /// Fail immediately with a buffer-full error.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBehindSettings {
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub overflow: OverflowPolicy,
}

impl Default for WriteBehindSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 512,
            flush_interval_ms: 1_000,
            max_retries: 3,
            retry_backoff_ms: 100,
            overflow: OverflowPolicy::Block,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub replicas: u32,
    pub partitions: u32,
    #[serde(default = "default_storage_profile")]
    pub storage_profile: String,
    #[serde(default)]
    pub consistency_mode: ConsistencyMode,
}

fn default_storage_profile() -> String {
    "default".to_string()
}

impl ZoneGridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ZoneGridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal zonegrid.toml for a single-node setup.
    pub fn scaffold(node_id: &str, data_dir: &Path) -> Self {
        ZoneGridConfig {
            node: NodeConfig {
                id: Some(node_id.to_string()),
                data_dir: data_dir.to_path_buf(),
            },
            membership: MembershipConfig {
                seeds: vec![SeedNode {
                    address: "127.0.0.1".to_string(),
                    port: 3344,
                }],
                ..Default::default()
            },
            cache: CacheConfig::default(),
            zones: vec![ZoneConfig {
                name: "DEFAULT".to_string(),
                replicas: 1,
                partitions: 25,
                storage_profile: default_storage_profile(),
                consistency_mode: ConsistencyMode::Strong,
            }],
        }
    }
}
