//! Error types for the ZoneGrid catalog.

use thiserror::Error;

use zonegrid_core::ColumnType;
use zonegrid_placement::PartitionError;
use zonegrid_state::StateError;

pub type ZoneResult<T> = Result<T, ZoneError>;
pub type SchemaResult<T> = Result<T, SchemaError>;
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Zone registry errors.
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("zone already exists: {0}")]
    AlreadyExists(String),

    #[error("zone not found: {0}")]
    NotFound(String),

    #[error("zone field '{field}' cannot be altered: {hint}")]
    ImmutableField { field: &'static str, hint: String },

    #[error("zone {zone} is in use by {tables} table(s)")]
    ZoneInUse { zone: String, tables: usize },

    #[error("invalid zone parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Table schema and colocation errors.
///
/// Raised at table-creation time; nothing is committed when one is returned.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table already exists: {0}")]
    AlreadyExists(String),

    #[error("table not found: {0}")]
    NotFound(String),

    #[error("invalid schema for {table}: {reason}")]
    Invalid { table: String, reason: String },

    #[error("table {table} is colocated with {parent}, which does not exist")]
    OrphanColocation { table: String, parent: String },

    #[error("colocation column {column}: {table} has {child}, {parent} has {parent_ty}")]
    TypeMismatch {
        table: String,
        parent: String,
        column: String,
        child: ColumnType,
        parent_ty: ColumnType,
    },

    #[error("colocation cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("colocation key of {table} does not match {parent}: {reason}")]
    ColocationKeyMismatch {
        table: String,
        parent: String,
        reason: String,
    },

    #[error("table {table} is in zone {zone} but its colocation parent {parent} is in zone {parent_zone}")]
    ZoneMismatch {
        table: String,
        zone: String,
        parent: String,
        parent_zone: String,
    },

    #[error("table {table} is the colocation parent of {}", .children.join(", "))]
    TableInUse { table: String, children: Vec<String> },

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// DDL syntax error with source position.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("syntax error at {line}:{column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Any catalog failure.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<PartitionError> for CatalogError {
    fn from(e: PartitionError) -> Self {
        CatalogError::Schema(SchemaError::Partition(e))
    }
}
