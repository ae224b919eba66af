//! zonegrid-state — embedded metadata store for ZoneGrid.
//!
//! Backed by [redb](https://docs.rs/redb), persists the cluster metadata
//! that must survive a restart: zone definitions, table schemas,
//! partition-to-replica assignments, and cluster nodes.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Assignment keys are `{zone}:{partition}` so that a prefix scan returns
//! every partition of one zone.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
