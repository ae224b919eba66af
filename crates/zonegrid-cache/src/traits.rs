//! Seams of the cache-consistency layer.
//!
//! A strategy sits between a fast [`KvStore`] and a slower
//! [`ExternalSource`]. All three strategies implement [`CacheStrategy`],
//! so callers can swap them without changing call sites.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;

use async_trait::async_trait;

use crate::error::{CacheError, CacheResult};

/// Point in time after which an operation gives up.
pub type Deadline = tokio::time::Instant;

/// Bounds for cache keys.
pub trait CacheKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> CacheKey for T {}

/// Bounds for cache values.
pub trait CacheValue: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> CacheValue for T {}

/// A change bound for the external system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<V> {
    Put(V),
    Delete,
}

/// The fast store a strategy caches into.
#[async_trait]
pub trait KvStore<K: CacheKey, V: CacheValue>: Send + Sync {
    async fn get(&self, key: &K) -> CacheResult<Option<V>>;
    async fn put(&self, key: K, value: V) -> CacheResult<()>;
    /// Returns true when the key was present.
    async fn delete(&self, key: &K) -> CacheResult<bool>;
}

/// The system of record behind the cache.
#[async_trait]
pub trait ExternalSource<K: CacheKey, V: CacheValue>: Send + Sync {
    /// `Ok(None)` is a definitive miss.
    async fn load(&self, key: &K) -> CacheResult<Option<V>>;
    async fn save(&self, key: &K, value: &V) -> CacheResult<()>;
    async fn remove(&self, key: &K) -> CacheResult<()>;

    /// Apply a batch of changes in order. Sources with a native batch API
    /// should override this; it must either apply every change or fail.
    async fn apply_batch(&self, changes: &[(K, Change<V>)]) -> CacheResult<()> {
        for (key, change) in changes {
            match change {
                Change::Put(value) => self.save(key, value).await?,
                Change::Delete => self.remove(key).await?,
            }
        }
        Ok(())
    }
}

/// A write-behind entry that ran out of retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter<K, V> {
    pub key: K,
    pub change: Change<V>,
    pub attempts: u32,
    pub error: String,
}

/// Where exhausted write-behind entries end up.
#[async_trait]
pub trait DeadLetterSink<K: CacheKey, V: CacheValue>: Send + Sync {
    async fn dead_letter(&self, entry: DeadLetter<K, V>);
}

/// Common `get`/`put`/`delete` contract of all strategies.
#[async_trait]
pub trait CacheStrategy<K: CacheKey, V: CacheValue>: Send + Sync {
    async fn get(&self, key: &K, deadline: Deadline) -> CacheResult<Option<V>>;
    async fn put(&self, key: K, value: V, deadline: Deadline) -> CacheResult<()>;
    async fn delete(&self, key: &K, deadline: Deadline) -> CacheResult<()>;

    /// Hits only; missing keys are absent from the map.
    async fn get_all(&self, keys: &[K], deadline: Deadline) -> CacheResult<HashMap<K, V>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key, deadline).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn put_all(&self, entries: Vec<(K, V)>, deadline: Deadline) -> CacheResult<()> {
        for (key, value) in entries {
            self.put(key, value, deadline).await?;
        }
        Ok(())
    }

    async fn remove_all(&self, keys: &[K], deadline: Deadline) -> CacheResult<()> {
        for key in keys {
            self.delete(key, deadline).await?;
        }
        Ok(())
    }
}

/// Run `fut` until `deadline`, mapping expiry to `DeadlineExceeded`.
pub async fn within<T>(
    deadline: Deadline,
    fut: impl Future<Output = CacheResult<T>>,
) -> CacheResult<T> {
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| CacheError::DeadlineExceeded)?
}
