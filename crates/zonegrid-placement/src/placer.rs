//! Replica assignment planner.
//!
//! Given a zone and the current node list, the placer decides:
//! 1. Which nodes hold each partition (rendezvous top-`replicas`)
//! 2. Which of them is primary (highest weight)
//! 3. Whether the zone is degraded (fewer nodes than `replicas`)
//!
//! It also diffs two plans so the replica manager knows which partitions
//! must move on a membership change.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, warn};

use zonegrid_core::{NodeId, PartitionId};
use zonegrid_state::ZoneDefinition;

use crate::scorer::rank_nodes;

/// A replica assignment for every partition of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentPlan {
    pub zone: String,
    /// Requested replica count.
    pub replicas: u32,
    /// Partition index → replica nodes, primary first.
    pub partitions: Vec<Vec<NodeId>>,
    /// True when the cluster has fewer nodes than `replicas`.
    pub degraded: bool,
}

impl AssignmentPlan {
    pub fn replicas_of(&self, partition: PartitionId) -> Option<&[NodeId]> {
        self.partitions.get(partition as usize).map(Vec::as_slice)
    }

    pub fn primary_of(&self, partition: PartitionId) -> Option<&NodeId> {
        self.partitions.get(partition as usize).and_then(|r| r.first())
    }
}

/// How one partition's replica set changes between two plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionMove {
    pub partition: PartitionId,
    /// Nodes that must receive a copy of the partition.
    pub added: Vec<NodeId>,
    /// Nodes that stop serving the partition.
    pub removed: Vec<NodeId>,
    pub primary_changed: bool,
}

/// Compute the replica assignment of a zone over `nodes`.
///
/// Duplicate node ids are ignored. An empty node list yields empty replica
/// sets for every partition.
pub fn compute_assignment(zone: &ZoneDefinition, nodes: &[NodeId]) -> AssignmentPlan {
    let unique: Vec<NodeId> = nodes
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let want = zone.replicas as usize;
    let degraded = unique.len() < want;
    if degraded {
        warn!(
            zone = %zone.name,
            replicas = zone.replicas,
            nodes = unique.len(),
            "cluster smaller than replica count, zone is degraded"
        );
    }

    let partitions = (0..zone.partitions)
        .map(|p| {
            rank_nodes(&zone.name, p, &unique)
                .into_iter()
                .take(want)
                .map(|s| s.node_id)
                .collect()
        })
        .collect();

    debug!(
        zone = %zone.name,
        partitions = zone.partitions,
        nodes = unique.len(),
        "computed replica assignment"
    );

    AssignmentPlan {
        zone: zone.name.clone(),
        replicas: zone.replicas,
        partitions,
        degraded,
    }
}

/// List the partitions whose replica set differs between `old` and `new`.
///
/// Both plans must describe the same zone and partition count; extra
/// partitions on either side are ignored.
pub fn diff_assignments(old: &[Vec<NodeId>], new: &[Vec<NodeId>]) -> Vec<PartitionMove> {
    old.iter()
        .zip(new.iter())
        .enumerate()
        .filter_map(|(p, (before, after))| {
            let added: Vec<NodeId> = after.iter().filter(|n| !before.contains(n)).cloned().collect();
            let removed: Vec<NodeId> = before.iter().filter(|n| !after.contains(n)).cloned().collect();
            let primary_changed = before.first() != after.first();
            if added.is_empty() && removed.is_empty() && !primary_changed {
                return None;
            }
            Some(PartitionMove {
                partition: p as PartitionId,
                added,
                removed,
                primary_changed,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonegrid_core::ConsistencyMode;

    fn zone(replicas: u32, partitions: u32) -> ZoneDefinition {
        ZoneDefinition {
            id: 1,
            name: "MUSICSTORE".to_string(),
            replicas,
            partitions,
            storage_profile: "default".to_string(),
            consistency_mode: ConsistencyMode::Strong,
        }
    }

    fn nodes(n: usize) -> Vec<NodeId> {
        (1..=n).map(|i| format!("node-{i}")).collect()
    }

    #[test]
    fn every_partition_gets_distinct_replicas() {
        let plan = compute_assignment(&zone(3, 25), &nodes(5));

        assert_eq!(plan.partitions.len(), 25);
        assert!(!plan.degraded);
        for replicas in &plan.partitions {
            assert_eq!(replicas.len(), 3);
            let distinct: BTreeSet<_> = replicas.iter().collect();
            assert_eq!(distinct.len(), 3);
        }
    }

    #[test]
    fn small_cluster_is_degraded() {
        let plan = compute_assignment(&zone(3, 4), &nodes(2));
        assert!(plan.degraded);
        assert!(plan.partitions.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut list = nodes(2);
        list.push("node-1".to_string());
        let plan = compute_assignment(&zone(3, 4), &list);
        assert!(plan.degraded);
        assert!(plan.partitions.iter().all(|r| r.len() == 2));
    }

    #[test]
    fn assignment_is_deterministic() {
        let a = compute_assignment(&zone(2, 25), &nodes(4));
        let mut reversed = nodes(4);
        reversed.reverse();
        let b = compute_assignment(&zone(2, 25), &reversed);
        assert_eq!(a, b);
    }

    #[test]
    fn adding_a_node_moves_at_most_one_replica_per_partition() {
        let z = zone(2, 50);
        let before = compute_assignment(&z, &nodes(4));
        let after = compute_assignment(&z, &nodes(5));

        for (old, new) in before.partitions.iter().zip(after.partitions.iter()) {
            let kept = new.iter().filter(|n| old.contains(n)).count();
            assert!(kept >= 1, "old={old:?} new={new:?}");
        }
        let moves = diff_assignments(&before.partitions, &after.partitions);
        assert!(moves.iter().all(|m| m.added == vec!["node-5".to_string()]));
    }

    #[test]
    fn removing_a_node_only_touches_its_partitions() {
        let z = zone(2, 50);
        let before = compute_assignment(&z, &nodes(4));
        let survivors: Vec<NodeId> = nodes(4).into_iter().filter(|n| n != "node-2").collect();
        let after = compute_assignment(&z, &survivors);

        for (p, (old, new)) in before.partitions.iter().zip(after.partitions.iter()).enumerate() {
            if !old.contains(&"node-2".to_string()) {
                assert_eq!(old, new, "partition {p} moved without losing a node");
            }
        }
    }

    #[test]
    fn diff_reports_primary_change() {
        let old = vec![vec!["a".to_string(), "b".to_string()]];
        let new = vec![vec!["b".to_string(), "a".to_string()]];
        let moves = diff_assignments(&old, &new);
        assert_eq!(moves.len(), 1);
        assert!(moves[0].primary_changed);
        assert!(moves[0].added.is_empty());
    }
}
