//! redb table definitions for the ZoneGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Zone definitions keyed by normalized zone name.
pub const ZONES: TableDefinition<&str, &[u8]> = TableDefinition::new("zones");

/// Table schemas keyed by normalized table name.
pub const TABLES: TableDefinition<&str, &[u8]> = TableDefinition::new("tables");

/// Partition assignments keyed by `{zone}:{partition}`.
pub const ASSIGNMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("assignments");

/// Node info keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
