//! ZoneGrid placement — where rows and replicas live.
//!
//! Pure, node-independent functions: every node and every client computes
//! the same answer from the same inputs. This crate does NOT track replica
//! state over time (that's `zonegrid-replica`). It only maps keys to
//! partitions and partitions to ranked node lists.
//!
//! # Components
//!
//! - **`partitioner`** — Canonical key encoding, 64-bit hashing, key → partition
//! - **`scorer`** — Rendezvous (highest-random-weight) node scoring
//! - **`placer`** — Per-zone replica assignment plans and plan diffs

pub mod partitioner;
pub mod placer;
pub mod scorer;

pub use partitioner::{PartitionError, PartitionResult, encode_key, key_hash, partition_for_hash, partition_of};
pub use placer::{AssignmentPlan, PartitionMove, compute_assignment, diff_assignments};
pub use scorer::{NodeScore, rank_nodes, rendezvous_weight};
