//! zonegrid-cluster — the running cluster.
//!
//! # Architecture
//!
//! ```text
//! Cluster
//!   ├── Catalog          zones, tables, colocation (zonegrid-catalog)
//!   ├── ReplicaManager   assignments, routing, failover (zonegrid-replica)
//!   └── MembershipProvider
//!       └── MembershipManager
//!           ├── Tracks nodes and heartbeats in the StateStore
//!           ├── Reaps dead nodes
//!           └── Publishes the ready node set
//! ```
//!
//! DDL executed through the [`Cluster`] assigns, rebalances or retires
//! replica groups as needed. Row reads and writes are routed through the
//! table's colocation-aware partition function.

pub mod cluster;
pub mod error;
pub mod kv;
pub mod membership;

pub use cluster::{Cluster, Promotion};
pub use error::{ClusterError, ClusterResult};
pub use kv::TableKvStore;
pub use membership::{Member, MemberStatus, MembershipManager, MembershipProvider};
