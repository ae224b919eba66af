//! Persisted record types for the ZoneGrid state store.
//!
//! Zones, table schemas, partition assignments and cluster nodes. All types
//! are serializable to/from JSON for storage in redb tables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use zonegrid_core::{ColumnType, ConsistencyMode, NodeId, PartitionId, ZoneId};

// ── Zone ──────────────────────────────────────────────────────────

/// A named placement policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZoneDefinition {
    pub id: ZoneId,
    pub name: String,
    /// Number of replicas per partition (primary included). Alterable.
    pub replicas: u32,
    /// Number of partitions. Fixed at creation.
    pub partitions: u32,
    pub storage_profile: String,
    pub consistency_mode: ConsistencyMode,
}

impl ZoneDefinition {
    /// Whether two definitions describe the same placement policy,
    /// ignoring the assigned id.
    pub fn same_parameters(&self, other: &ZoneDefinition) -> bool {
        self.name == other.name
            && self.replicas == other.replicas
            && self.partitions == other.partitions
            && self.storage_profile == other.storage_profile
            && self.consistency_mode == other.consistency_mode
    }
}

// ── Table ─────────────────────────────────────────────────────────

/// Column declaration within a table schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    /// Maximum length for `VARCHAR`/`VARBINARY` columns.
    pub length: Option<u32>,
}

/// Secondary index declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
}

/// A table schema as registered in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    /// Zone the table is placed in (referenced, never owned).
    pub zone: String,
    pub columns: Vec<ColumnDef>,
    /// Ordered primary-key column names.
    pub primary_key: Vec<String>,
    /// Subset of `primary_key` used for partitioning.
    pub colocation_key: Vec<String>,
    /// Table whose partitioning this table delegates to.
    pub colocate_with: Option<String>,
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether the colocation key is the whole primary key.
    pub fn is_self_colocated(&self) -> bool {
        self.colocation_key == self.primary_key
    }

    /// Position of a column within the primary key.
    pub fn key_position(&self, name: &str) -> Option<usize> {
        self.primary_key.iter().position(|k| k == name)
    }

    /// Non-key columns in declaration order.
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(|c| !self.primary_key.contains(&c.name))
    }
}

// ── Partition assignment ──────────────────────────────────────────

/// Lifecycle state of a partition's replica group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    Unassigned,
    Assigned,
    Rebalancing,
    Retired,
}

/// Persisted replica assignment for one partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub zone: String,
    pub partition: PartitionId,
    /// Serving replicas, primary first.
    pub replicas: Vec<NodeId>,
    pub state: PartitionState,
    /// Unix timestamp (seconds) of the last flip.
    pub updated_at: u64,
}

impl PartitionAssignment {
    /// Build the composite key for the assignments table.
    pub fn table_key(&self) -> String {
        assignment_key(&self.zone, self.partition)
    }
}

/// Composite key `{zone}:{partition}`.
pub fn assignment_key(zone: &str, partition: PartitionId) -> String {
    format!("{zone}:{partition}")
}

// ── Node ──────────────────────────────────────────────────────────

/// Information about a node in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub address: String,
    pub port: u16,
    /// Arbitrary labels (rack, region, ...).
    pub labels: HashMap<String, String>,
    /// Unix timestamp of last heartbeat.
    pub last_heartbeat: u64,
}
