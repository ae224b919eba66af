//! Partition rebalance controller.
//!
//! Moves one partition from its serving set to a target set. New replicas
//! are copied in batches of at most `replicas - 1`, so the old set keeps
//! serving throughout; the flip to the target set happens only after the
//! last batch has caught up.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use zonegrid_core::{NodeId, PartitionId};

/// Current phase of a partition move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RebalancePhase {
    Pending,
    /// Copying batch `current` of `total`.
    CatchingUp { current: u32, total: u32 },
    /// All copies done; waiting for the serving set to flip.
    Flipping,
    Completed,
    Aborted { reason: String },
}

/// One partition's move from `from` to `to`.
#[derive(Debug, Clone)]
pub struct PartitionRebalance {
    pub zone: String,
    pub partition: PartitionId,
    pub from: Vec<NodeId>,
    pub to: Vec<NodeId>,
    pub phase: RebalancePhase,
    batch_size: usize,
    additions: Vec<NodeId>,
    started_at: Option<Instant>,
}

impl PartitionRebalance {
    pub fn new(
        zone: &str,
        partition: PartitionId,
        from: Vec<NodeId>,
        to: Vec<NodeId>,
        replica_count: u32,
    ) -> Self {
        let additions = to.iter().filter(|n| !from.contains(n)).cloned().collect();
        Self {
            zone: zone.to_string(),
            partition,
            from,
            to,
            phase: RebalancePhase::Pending,
            batch_size: batch_size(replica_count),
            additions,
            started_at: None,
        }
    }

    /// Nodes that need a copy of the partition.
    pub fn additions(&self) -> &[NodeId] {
        &self.additions
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        let total = batch_count(self.additions.len(), self.batch_size);
        self.phase = if total == 0 {
            RebalancePhase::Flipping
        } else {
            RebalancePhase::CatchingUp { current: 1, total }
        };
        debug!(
            zone = %self.zone,
            partition = self.partition,
            batches = total,
            batch_size = self.batch_size,
            "partition rebalance started"
        );
    }

    /// The next batch of nodes to copy to, advancing the phase.
    ///
    /// Returns `None` once every batch has been handed out.
    pub fn next_batch(&mut self) -> Option<Vec<NodeId>> {
        let RebalancePhase::CatchingUp { current, total } = self.phase else {
            return None;
        };
        let start = (current as usize - 1) * self.batch_size;
        let end = (start + self.batch_size).min(self.additions.len());
        let batch = self.additions[start..end].to_vec();

        self.phase = if current >= total {
            RebalancePhase::Flipping
        } else {
            RebalancePhase::CatchingUp {
                current: current + 1,
                total,
            }
        };
        debug!(
            zone = %self.zone,
            partition = self.partition,
            batch = current,
            total,
            nodes = ?batch,
            "copying batch"
        );
        Some(batch)
    }

    pub fn complete(&mut self) {
        self.phase = RebalancePhase::Completed;
        let elapsed_ms = self
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        info!(
            zone = %self.zone,
            partition = self.partition,
            from = ?self.from,
            to = ?self.to,
            elapsed_ms,
            "partition flipped to new replica set"
        );
    }

    pub fn abort(&mut self, reason: String) {
        warn!(
            zone = %self.zone,
            partition = self.partition,
            %reason,
            "partition rebalance aborted, keeping old replica set"
        );
        self.phase = RebalancePhase::Aborted { reason };
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.phase,
            RebalancePhase::Completed | RebalancePhase::Aborted { .. }
        )
    }
}

/// Summary of one zone rebalance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebalanceReport {
    pub zone: String,
    /// Partitions whose replica set changed.
    pub moved: usize,
    /// Partition copies performed.
    pub copied: usize,
    pub degraded: bool,
    pub failed: Vec<(PartitionId, String)>,
}

/// At most `replicas - 1` nodes catch up at once, and at least one.
pub fn batch_size(replica_count: u32) -> usize {
    (replica_count.saturating_sub(1) as usize).max(1)
}

fn batch_count(items: usize, batch_size: usize) -> u32 {
    if batch_size == 0 {
        return 0;
    }
    items.div_ceil(batch_size) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn batches_never_exceed_replicas_minus_one() {
        let mut r = PartitionRebalance::new(
            "Z",
            0,
            nodes(&["a", "b", "c"]),
            nodes(&["d", "e", "f"]),
            3,
        );
        r.start();
        assert_eq!(r.phase, RebalancePhase::CatchingUp { current: 1, total: 2 });

        assert_eq!(r.next_batch().unwrap(), nodes(&["d", "e"]));
        assert_eq!(r.next_batch().unwrap(), nodes(&["f"]));
        assert_eq!(r.phase, RebalancePhase::Flipping);
        assert!(r.next_batch().is_none());

        r.complete();
        assert!(r.is_finished());
    }

    #[test]
    fn single_replica_moves_one_at_a_time() {
        assert_eq!(batch_size(1), 1);
        assert_eq!(batch_size(2), 1);
        assert_eq!(batch_size(5), 4);
    }

    #[test]
    fn reorder_only_goes_straight_to_flip() {
        let mut r = PartitionRebalance::new("Z", 0, nodes(&["a", "b"]), nodes(&["b", "a"]), 2);
        assert!(r.additions().is_empty());
        r.start();
        assert_eq!(r.phase, RebalancePhase::Flipping);
    }

    #[test]
    fn abort_records_reason() {
        let mut r = PartitionRebalance::new("Z", 0, nodes(&["a"]), nodes(&["b"]), 1);
        r.start();
        r.abort("copy failed".to_string());
        assert!(r.is_finished());
        assert!(matches!(r.phase, RebalancePhase::Aborted { reason } if reason == "copy failed"));
    }
}
