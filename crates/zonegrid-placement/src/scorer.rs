//! Rendezvous node scoring for replica placement.
//!
//! Each `(zone, partition, node)` triple gets a pseudo-random weight; a
//! partition's replicas are the highest-weighted nodes. Adding or removing
//! a node only changes the partitions where that node ranks in the top
//! `replicas`, so assignments move minimally on membership change.

use zonegrid_core::{NodeId, PartitionId};

use crate::partitioner::{fmix64, fnv1a64};

/// Scored placement result for a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScore {
    pub node_id: NodeId,
    pub weight: u64,
}

/// Rendezvous weight of `node` for one partition of `zone`.
pub fn rendezvous_weight(zone: &str, partition: PartitionId, node: &str) -> u64 {
    let mut buf = Vec::with_capacity(zone.len() + node.len() + 6);
    buf.extend_from_slice(zone.as_bytes());
    buf.push(0xff);
    buf.extend_from_slice(&partition.to_be_bytes());
    buf.push(0xff);
    buf.extend_from_slice(node.as_bytes());
    fmix64(fnv1a64(&buf))
}

/// Score all nodes for a partition and return them best first.
///
/// Ties (vanishingly rare) break on node id so the order is total.
pub fn rank_nodes(zone: &str, partition: PartitionId, nodes: &[NodeId]) -> Vec<NodeScore> {
    let mut scores: Vec<NodeScore> = nodes
        .iter()
        .map(|n| NodeScore {
            node_id: n.clone(),
            weight: rendezvous_weight(zone, partition, n),
        })
        .collect();

    scores.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.node_id.cmp(&b.node_id)));
    scores
}
