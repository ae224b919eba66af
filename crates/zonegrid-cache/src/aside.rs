//! Cache-aside.
//!
//! Reads populate the store lazily from the external source. Writes go
//! straight to the external source; callers invalidate the cached entry
//! themselves once the write has landed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::CacheResult;
use crate::traits::{CacheKey, CacheStrategy, CacheValue, Deadline, ExternalSource, KvStore, within};

pub struct CacheAside<K, V> {
    store: Arc<dyn KvStore<K, V>>,
    source: Arc<dyn ExternalSource<K, V>>,
}

impl<K: CacheKey, V: CacheValue> CacheAside<K, V> {
    pub fn new(store: Arc<dyn KvStore<K, V>>, source: Arc<dyn ExternalSource<K, V>>) -> Self {
        Self { store, source }
    }

    /// Drop the cached entry for `key`.
    pub async fn invalidate(&self, key: &K) -> CacheResult<bool> {
        let removed = self.store.delete(key).await?;
        debug!(?key, removed, "cache entry invalidated");
        Ok(removed)
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> CacheStrategy<K, V> for CacheAside<K, V> {
    async fn get(&self, key: &K, deadline: Deadline) -> CacheResult<Option<V>> {
        if let Some(value) = self.store.get(key).await? {
            return Ok(Some(value));
        }

        // A failed load leaves the store untouched.
        let loaded = within(deadline, self.source.load(key)).await?;
        if let Some(value) = &loaded {
            if let Err(e) = self.store.put(key.clone(), value.clone()).await {
                warn!(?key, error = %e, "failed to populate cache after load");
            }
        }
        Ok(loaded)
    }

    async fn put(&self, key: K, value: V, deadline: Deadline) -> CacheResult<()> {
        within(deadline, self.source.save(&key, &value)).await
    }

    async fn delete(&self, key: &K, deadline: Deadline) -> CacheResult<()> {
        within(deadline, self.source.remove(key)).await
    }
}
