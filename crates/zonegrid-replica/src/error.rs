//! Error types for the replica-group manager.

use thiserror::Error;

use zonegrid_core::{NodeId, PartitionId};
use zonegrid_placement::PartitionError;
use zonegrid_state::StateError;

pub type ReplicaResult<T> = Result<T, ReplicaError>;

#[derive(Debug, Error)]
pub enum ReplicaError {
    /// The partition's primary is gone and no successor is confirmed yet.
    #[error("no primary available for {zone}/{partition}")]
    NoPrimaryAvailable { zone: String, partition: PartitionId },

    #[error("no live replica for {zone}/{partition}")]
    NoReplicaAvailable { zone: String, partition: PartitionId },

    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("zone {0} has been retired")]
    ZoneRetired(String),

    #[error("partition {partition} out of range for zone {zone}")]
    PartitionOutOfRange { zone: String, partition: PartitionId },

    #[error("node {node} does not serve {zone}/{partition}")]
    NotReplica {
        zone: String,
        partition: PartitionId,
        node: NodeId,
    },

    #[error("write reached {received} of {required} required backups")]
    InsufficientAcks { required: usize, received: usize },

    #[error("no nodes to place zone {0} on")]
    NoNodes(String),

    /// The replica set kept changing while a write was in flight.
    #[error("replica set of {zone}/{partition} kept moving during the write")]
    RouteUnstable { zone: String, partition: PartitionId },

    #[error("no live source replica to copy {zone}/{partition} from")]
    NoSourceReplica { zone: String, partition: PartitionId },

    #[error("node {0} is down")]
    NodeDown(NodeId),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    State(#[from] StateError),
}
