//! # zonegrid-replica
//!
//! Replica groups for zone partitions: initial assignment, throttled
//! rebalancing, read/write routing by consistency mode, and failover.

pub mod balancer;
pub mod error;
pub mod group;
pub mod manager;
pub mod rebalance;
pub mod transport;

pub use balancer::RoundRobinBalancer;
pub use error::{ReplicaError, ReplicaResult};
pub use group::PartitionGroup;
pub use manager::{ReplicaManager, WriteAck, WriteRoute, acks_required};
pub use rebalance::{PartitionRebalance, RebalancePhase, RebalanceReport};
pub use transport::{LocalTransport, ReplicaTransport, ReplicatedWrite, WriteOp};
