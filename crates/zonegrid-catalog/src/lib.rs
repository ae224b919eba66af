//! zonegrid-catalog — cluster metadata for ZoneGrid.
//!
//! - [`registry`]: the zone registry (create/alter/drop with single-writer
//!   serialisation and snapshot reads)
//! - [`schema`]: the table schema builder
//! - [`colocation`]: the colocation planner and cached partition functions
//! - [`ddl`]: tokenizer and parser for zone/table DDL
//! - [`catalog`]: the `Catalog` context tying them together

pub mod catalog;
pub mod colocation;
pub mod ddl;
pub mod error;
pub mod registry;
pub mod schema;

pub use catalog::{Catalog, Outcome};
pub use colocation::{ColocationGraph, EffectivePartitionFn, TableNode};
pub use ddl::{Statement, parse};
pub use error::{
    CatalogError, CatalogResult, ParseError, SchemaError, SchemaResult, ZoneError, ZoneResult,
};
pub use registry::{DEFAULT_ZONE, MAX_PARTITIONS, ZoneAlter, ZoneRegistry, ZoneSpec};
pub use schema::{TableSchemaBuilder, TableSchemaExt};

/// Normalise an unquoted SQL identifier.
pub fn normalize_ident(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}
