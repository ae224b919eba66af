//! Replica data plane seam.
//!
//! [`ReplicaTransport`] is how the manager reaches a node's copy of a
//! partition. [`LocalTransport`] keeps every node's partitions in process,
//! which is what the daemon and the tests run on.
//!
//! Rows are stored under their exact primary-key tuple. Callers normalise
//! keys to the column types first, so the same row is always addressed
//! by the same values.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use zonegrid_core::{NodeId, PartitionId, Value};

use crate::error::{ReplicaError, ReplicaResult};

/// What a replicated write does to its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    Put(Vec<Value>),
    Delete,
}

/// One write as shipped to a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedWrite {
    pub table: String,
    /// Full primary-key tuple.
    pub key: Vec<Value>,
    pub op: WriteOp,
    /// Primary-assigned sequence; higher wins.
    pub seq: u64,
}

#[async_trait]
pub trait ReplicaTransport: Send + Sync {
    /// Apply a write to `node`'s copy of the partition.
    async fn apply(
        &self,
        node: &str,
        zone: &str,
        partition: PartitionId,
        write: &ReplicatedWrite,
    ) -> ReplicaResult<()>;

    /// Undo `write` on `node`, restoring the version it replaced. A no-op
    /// once a newer write has superseded it.
    async fn revert(
        &self,
        node: &str,
        zone: &str,
        partition: PartitionId,
        write: &ReplicatedWrite,
    ) -> ReplicaResult<()>;

    /// Read one row's value columns from `node`.
    async fn read(
        &self,
        node: &str,
        zone: &str,
        partition: PartitionId,
        table: &str,
        key: &[Value],
    ) -> ReplicaResult<Option<Vec<Value>>>;

    /// Copy a whole partition from `from` to `to`. Returns the number of
    /// entries transferred.
    async fn copy_partition(
        &self,
        from: &str,
        to: &str,
        zone: &str,
        partition: PartitionId,
    ) -> ReplicaResult<usize>;

    fn is_alive(&self, node: &str) -> bool;

    /// Drop every node's copy of every partition of `zone`.
    fn purge_zone(&self, zone: &str);

    /// Drop every row of `table` in `zone`, on every node.
    fn purge_table(&self, zone: &str, table: &str);
}

#[derive(Debug, Clone, PartialEq)]
struct Versioned {
    seq: u64,
    /// `None` is a tombstone.
    value: Option<Vec<Value>>,
    /// The version this one displaced, one level deep, for reverts.
    replaced: Option<Box<Versioned>>,
}

impl Versioned {
    fn shallow(&self) -> Versioned {
        Versioned {
            seq: self.seq,
            value: self.value.clone(),
            replaced: None,
        }
    }
}

type RowKey = (String, Vec<Value>);
type PartitionData = HashMap<RowKey, Versioned>;

#[derive(Debug, Default)]
struct NodeData {
    partitions: HashMap<(String, PartitionId), PartitionData>,
}

/// In-process transport. Nodes spring into existence on first use and
/// are alive until marked down.
#[derive(Default)]
pub struct LocalTransport {
    nodes: RwLock<HashMap<NodeId, NodeData>>,
    down: RwLock<HashSet<NodeId>>,
    copy_delay: Option<Duration>,
    apply_delay: RwLock<HashMap<NodeId, Duration>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every partition copy, to widen the catch-up window in tests.
    pub fn with_copy_delay(mut self, delay: Duration) -> Self {
        self.copy_delay = Some(delay);
        self
    }

    /// Delay every write applied to `node`. Liveness is checked after the
    /// delay, so a node killed meanwhile fails the write.
    pub fn set_apply_delay(&self, node: &str, delay: Option<Duration>) {
        let mut delays = self.apply_delay.write();
        match delay {
            Some(delay) => delays.insert(node.to_string(), delay),
            None => delays.remove(node),
        };
    }

    /// Mark a node unreachable. Its data is kept.
    pub fn kill(&self, node: &str) {
        self.down.write().insert(node.to_string());
        debug!(node, "node marked down");
    }

    pub fn revive(&self, node: &str) {
        self.down.write().remove(node);
        debug!(node, "node marked up");
    }

    /// Live (non-tombstone) entries held by `node` for a partition.
    pub fn entry_count(&self, node: &str, zone: &str, partition: PartitionId) -> usize {
        self.nodes
            .read()
            .get(node)
            .and_then(|n| n.partitions.get(&(zone.to_string(), partition)))
            .map(|p| p.values().filter(|v| v.value.is_some()).count())
            .unwrap_or(0)
    }

    fn check_alive(&self, node: &str) -> ReplicaResult<()> {
        if self.down.read().contains(node) {
            return Err(ReplicaError::NodeDown(node.to_string()));
        }
        Ok(())
    }
}

/// Merge `incoming` into `target`, keeping the higher sequence per key.
fn merge(target: &mut PartitionData, incoming: PartitionData) {
    for (key, entry) in incoming {
        match target.get(&key) {
            Some(existing) if existing.seq >= entry.seq => {}
            _ => {
                target.insert(key, entry);
            }
        }
    }
}

/// Apply one write, remembering the version it displaces.
fn apply_one(target: &mut PartitionData, key: RowKey, seq: u64, value: Option<Vec<Value>>) {
    let replaced = match target.get(&key) {
        Some(existing) if existing.seq >= seq => return,
        Some(existing) => Some(Box::new(existing.shallow())),
        None => None,
    };
    target.insert(
        key,
        Versioned {
            seq,
            value,
            replaced,
        },
    );
}

/// Take back the version written at `seq`.
fn revert_one(target: &mut PartitionData, key: &RowKey, seq: u64) {
    let Some(current) = target.get_mut(key) else {
        return;
    };
    if current.seq == seq {
        match current.replaced.take() {
            Some(previous) => *current = *previous,
            None => {
                target.remove(key);
            }
        }
    } else if current.replaced.as_ref().is_some_and(|r| r.seq == seq) {
        // Superseded already; make sure it never comes back on a later revert.
        current.replaced = None;
    }
}

#[async_trait]
impl ReplicaTransport for LocalTransport {
    async fn apply(
        &self,
        node: &str,
        zone: &str,
        partition: PartitionId,
        write: &ReplicatedWrite,
    ) -> ReplicaResult<()> {
        let delay = self.apply_delay.read().get(node).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_alive(node)?;
        let key = (write.table.clone(), write.key.clone());
        let value = match &write.op {
            WriteOp::Put(v) => Some(v.clone()),
            WriteOp::Delete => None,
        };

        let mut nodes = self.nodes.write();
        let data = nodes
            .entry(node.to_string())
            .or_default()
            .partitions
            .entry((zone.to_string(), partition))
            .or_default();
        apply_one(data, key, write.seq, value);
        Ok(())
    }

    async fn revert(
        &self,
        node: &str,
        zone: &str,
        partition: PartitionId,
        write: &ReplicatedWrite,
    ) -> ReplicaResult<()> {
        self.check_alive(node)?;
        let key = (write.table.clone(), write.key.clone());
        let mut nodes = self.nodes.write();
        if let Some(data) = nodes
            .get_mut(node)
            .and_then(|n| n.partitions.get_mut(&(zone.to_string(), partition)))
        {
            revert_one(data, &key, write.seq);
        }
        Ok(())
    }

    async fn read(
        &self,
        node: &str,
        zone: &str,
        partition: PartitionId,
        table: &str,
        key: &[Value],
    ) -> ReplicaResult<Option<Vec<Value>>> {
        self.check_alive(node)?;
        let key = (table.to_string(), key.to_vec());
        Ok(self
            .nodes
            .read()
            .get(node)
            .and_then(|n| n.partitions.get(&(zone.to_string(), partition)))
            .and_then(|p| p.get(&key))
            .and_then(|v| v.value.clone()))
    }

    async fn copy_partition(
        &self,
        from: &str,
        to: &str,
        zone: &str,
        partition: PartitionId,
    ) -> ReplicaResult<usize> {
        if let Some(delay) = self.copy_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_alive(from)?;
        self.check_alive(to)?;

        let pid = (zone.to_string(), partition);
        let mut nodes = self.nodes.write();
        let snapshot = nodes
            .get(from)
            .and_then(|n| n.partitions.get(&pid))
            .cloned()
            .unwrap_or_default();
        let count = snapshot.len();
        let target = nodes
            .entry(to.to_string())
            .or_default()
            .partitions
            .entry(pid)
            .or_default();
        merge(target, snapshot);
        Ok(count)
    }

    fn is_alive(&self, node: &str) -> bool {
        !self.down.read().contains(node)
    }

    fn purge_zone(&self, zone: &str) {
        for data in self.nodes.write().values_mut() {
            data.partitions.retain(|(z, _), _| z != zone);
        }
        debug!(zone, "zone data purged");
    }

    fn purge_table(&self, zone: &str, table: &str) {
        let mut purged = 0;
        for data in self.nodes.write().values_mut() {
            for ((z, _), rows) in data.partitions.iter_mut() {
                if z == zone {
                    let before = rows.len();
                    rows.retain(|(t, _), _| t != table);
                    purged += before - rows.len();
                }
            }
        }
        debug!(zone, table, purged, "table data purged");
    }
}
