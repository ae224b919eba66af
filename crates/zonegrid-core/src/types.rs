//! Shared types used across ZoneGrid crates.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

/// Numeric zone identifier, assigned by the zone registry.
pub type ZoneId = u32;

/// Numeric table identifier, assigned by the catalog.
pub type TableId = u32;

/// Partition index within a zone, in `[0, partition_count)`.
pub type PartitionId = u32;

/// Replication consistency mode of a zone.
///
/// Governs both read routing (which replicas may answer) and how many
/// backup acknowledgements a write waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyMode {
    /// Reads from the primary only; writes wait for every backup.
    #[default]
    Strong,
    /// Reads from any replica; writes wait for one backup.
    Eventual,
    /// Reads from any replica; writes do not wait for backups.
    Weak,
}

impl ConsistencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyMode::Strong => "STRONG",
            ConsistencyMode::Eventual => "EVENTUAL",
            ConsistencyMode::Weak => "WEAK",
        }
    }

    /// Parse a mode name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STRONG" => Some(ConsistencyMode::Strong),
            "EVENTUAL" => Some(ConsistencyMode::Eventual),
            "WEAK" => Some(ConsistencyMode::Weak),
            _ => None,
        }
    }
}

impl fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Columns ───────────────────────────────────────────────────────

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Int32,
    Int64,
    Double,
    Varchar,
    Varbinary,
    /// Milliseconds since the Unix epoch.
    Timestamp,
}

/// Semantic family of a column type.
///
/// Two columns can share a colocation key only when their families match,
/// because the canonical key encoding is defined per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    Boolean,
    Integer,
    Double,
    String,
    Bytes,
    Timestamp,
}

impl ColumnType {
    pub fn family(&self) -> TypeFamily {
        match self {
            ColumnType::Boolean => TypeFamily::Boolean,
            ColumnType::Int32 | ColumnType::Int64 => TypeFamily::Integer,
            ColumnType::Double => TypeFamily::Double,
            ColumnType::Varchar => TypeFamily::String,
            ColumnType::Varbinary => TypeFamily::Bytes,
            ColumnType::Timestamp => TypeFamily::Timestamp,
        }
    }

    /// Whether values of `self` and `other` hash identically.
    pub fn is_compatible_with(&self, other: &ColumnType) -> bool {
        self.family() == other.family()
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Int32 => "INT",
            ColumnType::Int64 => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Varbinary => "VARBINARY",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

// ── Values ────────────────────────────────────────────────────────

/// A single column value.
///
/// Equality and hashing compare doubles by bit pattern (with `-0.0`
/// folded into `0.0`), so values can key maps the same way they key
/// partitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Varchar(String),
    Varbinary(Vec<u8>),
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The column type this value belongs to, or `None` for `Null`.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Int32(_) => Some(ColumnType::Int32),
            Value::Int64(_) => Some(ColumnType::Int64),
            Value::Double(_) => Some(ColumnType::Double),
            Value::Varchar(_) => Some(ColumnType::Varchar),
            Value::Varbinary(_) => Some(ColumnType::Varbinary),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    /// Whether this value may be stored in a column of type `ty`.
    ///
    /// Integers are accepted across the integer family; `Null` is
    /// accepted everywhere (nullability is checked separately).
    pub fn fits(&self, ty: ColumnType) -> bool {
        match self.column_type() {
            None => true,
            Some(own) => own == ty || (own.family() == ty.family() && ty == ColumnType::Int64),
        }
    }

    /// Widen this value to the exact representation of column type `ty`.
    ///
    /// Rows are stored and compared under their column types, so an
    /// `Int32` written into a `BIGINT` column must become an `Int64`.
    /// Values that do not fit are returned unchanged.
    pub fn coerce(self, ty: ColumnType) -> Value {
        match (self, ty) {
            (Value::Int32(v), ColumnType::Int64) => Value::Int64(i64::from(v)),
            (other, _) => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Varchar(s) => write!(f, "'{s}'"),
            Value::Varbinary(b) => write!(f, "x'{}'", b.iter().map(|x| format!("{x:02x}")).collect::<String>()),
            Value::Timestamp(ms) => write!(f, "ts({ms})"),
        }
    }
}

fn double_bits(v: f64) -> u64 {
    if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => double_bits(*a) == double_bits(*b),
            (Value::Varchar(a), Value::Varchar(b)) => a == b,
            (Value::Varbinary(a), Value::Varbinary(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) | Value::Timestamp(v) => v.hash(state),
            Value::Double(v) => double_bits(*v).hash(state),
            Value::Varchar(s) => s.hash(state),
            Value::Varbinary(b) => b.hash(state),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Varchar(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Varchar(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Varbinary(v)
    }
}

/// A row: primary-key tuple plus value tuple, addressed to one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub table: String,
    /// Primary-key columns, in the table's primary-key order.
    pub key: Vec<Value>,
    /// Non-key columns, in declaration order.
    pub value: Vec<Value>,
}

impl Row {
    pub fn new(table: &str, key: Vec<Value>, value: Vec<Value>) -> Self {
        Self {
            table: table.to_string(),
            key,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_mode_parses_case_insensitively() {
        assert_eq!(ConsistencyMode::parse("eventual"), Some(ConsistencyMode::Eventual));
        assert_eq!(ConsistencyMode::parse("STRONG"), Some(ConsistencyMode::Strong));
        assert_eq!(ConsistencyMode::parse("sometimes"), None);
    }

    #[test]
    fn integer_family_is_compatible() {
        assert!(ColumnType::Int32.is_compatible_with(&ColumnType::Int64));
        assert!(!ColumnType::Int32.is_compatible_with(&ColumnType::Varchar));
        assert!(!ColumnType::Timestamp.is_compatible_with(&ColumnType::Int64));
    }

    #[test]
    fn value_fits_column() {
        assert!(Value::Int32(1).fits(ColumnType::Int64));
        assert!(!Value::Int64(1).fits(ColumnType::Int32));
        assert!(Value::Null.fits(ColumnType::Varchar));
        assert!(!Value::from("x").fits(ColumnType::Boolean));
    }

    #[test]
    fn coerce_widens_integers_only() {
        assert_eq!(Value::Int32(1).coerce(ColumnType::Int64), Value::Int64(1));
        assert_eq!(Value::Int32(1).coerce(ColumnType::Int32), Value::Int32(1));
        assert_eq!(Value::Null.coerce(ColumnType::Int64), Value::Null);
        assert_eq!(Value::from("").coerce(ColumnType::Varchar), Value::from(""));
    }

    #[test]
    fn doubles_compare_by_bits() {
        use std::collections::HashSet;
        assert_eq!(Value::Double(-0.0), Value::Double(0.0));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Int32(1), Value::Int64(1));

        let keys: HashSet<Vec<Value>> = [vec![Value::Double(0.0)], vec![Value::Double(-0.0)]].into();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn value_serializes_tagged() {
        let json = serde_json::to_string(&Value::Int64(7)).unwrap();
        assert_eq!(json, r#"{"type":"int64","value":7}"#);
    }
}
