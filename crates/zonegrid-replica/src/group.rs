//! Per-partition replica group.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use zonegrid_core::{NodeId, PartitionId};
use zonegrid_state::{PartitionAssignment, PartitionState};

/// Replica group of one partition.
///
/// `replicas` are the serving copies, primary first. During a rebalance
/// `target` holds the set being moved to and `catching_up` the nodes
/// currently receiving a copy; both receive routed writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionGroup {
    pub partition: PartitionId,
    pub state: PartitionState,
    pub replicas: Vec<NodeId>,
    pub catching_up: Vec<NodeId>,
    pub target: Vec<NodeId>,
    /// False after the primary failed, until a successor is confirmed.
    pub primary_confirmed: bool,
    pub degraded: bool,
    #[serde(skip)]
    write_seq: u64,
}

impl PartitionGroup {
    pub fn unassigned(partition: PartitionId) -> Self {
        Self {
            partition,
            state: PartitionState::Unassigned,
            replicas: Vec::new(),
            catching_up: Vec::new(),
            target: Vec::new(),
            primary_confirmed: false,
            degraded: true,
            write_seq: seq_base(),
        }
    }

    pub fn assigned(partition: PartitionId, replicas: Vec<NodeId>, degraded: bool) -> Self {
        let mut group = Self::unassigned(partition);
        group.set_serving(replicas, degraded);
        group
    }

    /// Rebuild a group from its persisted assignment. A rebalance cut
    /// short by a restart resumes from the old serving set.
    pub fn from_assignment(a: &PartitionAssignment, replica_count: u32) -> Self {
        let degraded = (a.replicas.len() as u32) < replica_count;
        let mut group = Self::assigned(a.partition, a.replicas.clone(), degraded);
        if a.state == PartitionState::Retired {
            group.state = PartitionState::Retired;
        }
        group
    }

    /// Confirmed primary, if any.
    pub fn primary(&self) -> Option<&NodeId> {
        if self.primary_confirmed {
            self.replicas.first()
        } else {
            None
        }
    }

    pub fn backups(&self) -> impl Iterator<Item = &NodeId> {
        self.replicas.iter().skip(1)
    }

    /// Nodes that should receive a write besides the primary.
    pub fn write_followers(&self) -> Vec<NodeId> {
        let mut followers: Vec<NodeId> = self.backups().cloned().collect();
        for node in &self.catching_up {
            if !followers.contains(node) && self.replicas.first() != Some(node) {
                followers.push(node.clone());
            }
        }
        followers
    }

    pub fn next_seq(&mut self) -> u64 {
        self.write_seq += 1;
        self.write_seq
    }

    /// Replace the serving set, e.g. after a flip.
    pub fn set_serving(&mut self, replicas: Vec<NodeId>, degraded: bool) {
        self.state = if replicas.is_empty() {
            PartitionState::Unassigned
        } else {
            PartitionState::Assigned
        };
        self.primary_confirmed = !replicas.is_empty();
        self.replicas = replicas;
        self.catching_up.clear();
        self.target.clear();
        self.degraded = degraded;
    }

    /// Drop `node` from every role. Returns true when it was the primary.
    ///
    /// The last serving replica is never dropped: it stays listed, with
    /// its primary unconfirmed, so the partition keeps the only copy of
    /// its data and can be confirmed again once that node is back.
    pub fn remove_node(&mut self, node: &str) -> bool {
        let was_primary = self.replicas.first().is_some_and(|p| p == node);
        if self.replicas.iter().any(|n| n != node) {
            self.replicas.retain(|n| n != node);
        }
        self.catching_up.retain(|n| n != node);
        self.target.retain(|n| n != node);
        if was_primary {
            self.primary_confirmed = false;
        }
        was_primary
    }

    /// Promote a serving backup to primary.
    pub fn promote(&mut self, node: &str) -> bool {
        let Some(idx) = self.replicas.iter().position(|n| n == node) else {
            return false;
        };
        let node = self.replicas.remove(idx);
        self.replicas.insert(0, node);
        self.primary_confirmed = true;
        true
    }

    pub fn to_assignment(&self, zone: &str) -> PartitionAssignment {
        PartitionAssignment {
            zone: zone.to_string(),
            partition: self.partition,
            replicas: self.replicas.clone(),
            state: self.state,
            updated_at: epoch_secs(),
        }
    }
}

/// Sequences start from the wall clock so they keep increasing across
/// restarts.
fn seq_base() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
