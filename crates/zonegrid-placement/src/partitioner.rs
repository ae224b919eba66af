//! Key partitioner.
//!
//! Maps a colocation-key tuple to a partition of a zone. The mapping is a
//! pure function of the key values and the zone's partition count, so it
//! agrees across nodes, client processes and restarts.
//!
//! Keys are first encoded canonically (one tagged component per value,
//! integers widened so `INT` and `BIGINT` columns hash alike), then hashed
//! with FNV-1a and an avalanche finaliser, then reduced modulo the
//! partition count.

use thiserror::Error;

use zonegrid_core::{PartitionId, Value};
use zonegrid_state::ZoneDefinition;

/// Errors raised while partitioning a key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("zone has no partitions")]
    ZeroPartitions,
}

pub type PartitionResult<T> = Result<T, PartitionError>;

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_DOUBLE: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_TIMESTAMP: u8 = 0x06;

/// Encode a key tuple canonically.
///
/// Rejects empty tuples, `NULL` components, and empty string/byte
/// components.
pub fn encode_key(key: &[Value]) -> PartitionResult<Vec<u8>> {
    if key.is_empty() {
        return Err(PartitionError::InvalidKey("empty key tuple".to_string()));
    }

    let mut buf = Vec::with_capacity(key.len() * 9);
    for (i, value) in key.iter().enumerate() {
        match value {
            Value::Null => {
                return Err(PartitionError::InvalidKey(format!(
                    "key component {i} is NULL"
                )));
            }
            Value::Boolean(b) => {
                buf.push(TAG_BOOLEAN);
                buf.push(u8::from(*b));
            }
            Value::Int32(v) => {
                buf.push(TAG_INTEGER);
                buf.extend_from_slice(&i64::from(*v).to_be_bytes());
            }
            Value::Int64(v) => {
                buf.push(TAG_INTEGER);
                buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Double(v) => {
                buf.push(TAG_DOUBLE);
                buf.extend_from_slice(&canonical_f64_bits(*v).to_be_bytes());
            }
            Value::Varchar(s) => {
                if s.is_empty() {
                    return Err(PartitionError::InvalidKey(format!(
                        "key component {i} is an empty string"
                    )));
                }
                buf.push(TAG_STRING);
                push_len_prefixed(&mut buf, s.as_bytes());
            }
            Value::Varbinary(b) => {
                if b.is_empty() {
                    return Err(PartitionError::InvalidKey(format!(
                        "key component {i} is empty bytes"
                    )));
                }
                buf.push(TAG_BYTES);
                push_len_prefixed(&mut buf, b);
            }
            Value::Timestamp(ms) => {
                buf.push(TAG_TIMESTAMP);
                buf.extend_from_slice(&ms.to_be_bytes());
            }
        }
    }
    Ok(buf)
}

/// 64-bit hash of a key tuple.
pub fn key_hash(key: &[Value]) -> PartitionResult<u64> {
    let encoded = encode_key(key)?;
    Ok(fmix64(fnv1a64(&encoded)))
}

/// Reduce a key hash to a partition index.
pub fn partition_for_hash(hash: u64, partitions: u32) -> PartitionResult<PartitionId> {
    if partitions == 0 {
        return Err(PartitionError::ZeroPartitions);
    }
    Ok((hash % u64::from(partitions)) as PartitionId)
}

/// Partition of a colocation-key tuple within a zone.
pub fn partition_of(zone: &ZoneDefinition, key: &[Value]) -> PartitionResult<PartitionId> {
    partition_for_hash(key_hash(key)?, zone.partitions)
}

/// FNV-1a 64-bit.
pub(crate) fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// 64-bit avalanche finaliser (MurmurHash3 fmix64).
pub(crate) fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn canonical_f64_bits(v: f64) -> u64 {
    if v == 0.0 {
        0.0f64.to_bits()
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}
