//! Error types for the cluster facade.

use thiserror::Error;

use zonegrid_catalog::{CatalogError, SchemaError};
use zonegrid_placement::PartitionError;
use zonegrid_replica::ReplicaError;
use zonegrid_state::StateError;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Replica(#[from] ReplicaError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    State(#[from] StateError),

    /// A row does not match its table's schema.
    #[error("invalid row for table {table}: {reason}")]
    InvalidRow { table: String, reason: String },

    #[error("unexpected DDL outcome: {0}")]
    UnexpectedOutcome(String),
}

impl ClusterError {
    /// True for routing/availability failures a caller may retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::Replica(
                ReplicaError::NoPrimaryAvailable { .. }
                    | ReplicaError::NoReplicaAvailable { .. }
                    | ReplicaError::InsufficientAcks { .. }
                    | ReplicaError::RouteUnstable { .. }
            )
        )
    }
}
