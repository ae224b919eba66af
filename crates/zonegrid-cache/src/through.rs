//! Write-through.
//!
//! Every write commits to the external system and the store as one unit
//! under a per-key lock. The external system goes first. Any failure after
//! the external call was issued, including a missed deadline or an error
//! from the call itself, restores the external system to its previous
//! value, so neither side shows the new value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::{CacheError, CacheResult};
use crate::locks::KeyLocks;
use crate::traits::{CacheKey, CacheStrategy, CacheValue, Deadline, ExternalSource, KvStore, within};

const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct WriteThrough<K, V> {
    store: Arc<dyn KvStore<K, V>>,
    source: Arc<dyn ExternalSource<K, V>>,
    locks: KeyLocks,
    rollback_timeout: Duration,
}

impl<K: CacheKey, V: CacheValue> WriteThrough<K, V> {
    pub fn new(store: Arc<dyn KvStore<K, V>>, source: Arc<dyn ExternalSource<K, V>>) -> Self {
        Self {
            store,
            source,
            locks: KeyLocks::new(),
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
        }
    }

    /// Bound on a rollback call. Rollbacks run after the caller's deadline
    /// may already have passed, so they get their own budget.
    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = timeout;
        self
    }

    /// Put the external system back to `previous` after a failed write.
    async fn restore(&self, key: &K, previous: Option<V>) {
        let restored = tokio::time::timeout(self.rollback_timeout, async {
            match &previous {
                Some(value) => self.source.save(key, value).await,
                None => self.source.remove(key).await,
            }
        })
        .await
        .unwrap_or(Err(CacheError::DeadlineExceeded));
        match restored {
            Ok(()) => debug!(?key, "external write rolled back"),
            Err(e) => error!(?key, error = %e, "failed to roll back external write"),
        }
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> CacheStrategy<K, V> for WriteThrough<K, V> {
    async fn get(&self, key: &K, deadline: Deadline) -> CacheResult<Option<V>> {
        if let Some(value) = self.store.get(key).await? {
            return Ok(Some(value));
        }
        let _guard = self.locks.lock(key).await;
        let loaded = within(deadline, self.source.load(key)).await?;
        if let Some(value) = &loaded {
            self.store.put(key.clone(), value.clone()).await?;
        }
        Ok(loaded)
    }

    async fn put(&self, key: K, value: V, deadline: Deadline) -> CacheResult<()> {
        let _guard = self.locks.lock(&key).await;

        let previous = within(deadline, self.source.load(&key)).await?;
        // A save that errors or outlives the deadline may still have landed.
        if let Err(e) = within(deadline, self.source.save(&key, &value)).await {
            warn!(?key, error = %e, "external write failed, rolling back");
            self.restore(&key, previous).await;
            return Err(e);
        }

        if let Err(e) = self.store.put(key.clone(), value).await {
            warn!(?key, error = %e, "store write failed, rolling back external write");
            self.restore(&key, previous).await;
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &K, deadline: Deadline) -> CacheResult<()> {
        let _guard = self.locks.lock(key).await;

        let previous = within(deadline, self.source.load(key)).await?;
        if let Err(e) = within(deadline, self.source.remove(key)).await {
            warn!(?key, error = %e, "external delete failed, rolling back");
            self.restore(key, previous).await;
            return Err(e);
        }

        if let Err(e) = self.store.delete(key).await {
            warn!(?key, error = %e, "store delete failed, rolling back external delete");
            self.restore(key, previous).await;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::error::CacheError;
    use crate::memory::{MemorySource, MemoryStore};

    fn far() -> Deadline {
        Instant::now() + Duration::from_secs(60)
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl KvStore<u32, String> for BrokenStore {
        async fn get(&self, _: &u32) -> CacheResult<Option<String>> {
            Ok(None)
        }
        async fn put(&self, _: u32, _: String) -> CacheResult<()> {
            Err(CacheError::Store("disk full".to_string()))
        }
        async fn delete(&self, _: &u32) -> CacheResult<bool> {
            Err(CacheError::Store("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn success_updates_both_sides() {
        let store = Arc::new(MemoryStore::<u32, String>::new());
        let source = Arc::new(MemorySource::<u32, String>::new());
        let wt = WriteThrough::new(store.clone(), source.clone());

        wt.put(1, "a".to_string(), far()).await.unwrap();
        assert_eq!(store.get(&1).await.unwrap(), Some("a".to_string()));
        assert_eq!(source.peek(&1), Some("a".to_string()));

        wt.delete(&1, far()).await.unwrap();
        assert!(store.is_empty());
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn external_failure_leaves_store_unchanged() {
        let store = Arc::new(MemoryStore::<u32, String>::new());
        let source = Arc::new(MemorySource::<u32, String>::new());
        let wt = WriteThrough::new(store.clone(), source.clone());
        wt.put(1, "a".to_string(), far()).await.unwrap();

        source.fail_saves(true);
        assert!(matches!(
            wt.put(1, "b".to_string(), far()).await,
            Err(CacheError::SourceUnavailable(_))
        ));
        assert_eq!(store.get(&1).await.unwrap(), Some("a".to_string()));
        assert_eq!(source.peek(&1), Some("a".to_string()));
    }

    #[tokio::test]
    async fn store_failure_rolls_back_external() {
        let source = Arc::new(MemorySource::<u32, String>::with_entries([(1, "old".to_string())]));
        let wt = WriteThrough::new(Arc::new(BrokenStore), source.clone());

        assert!(matches!(
            wt.put(1, "new".to_string(), far()).await,
            Err(CacheError::Store(_))
        ));
        assert_eq!(source.peek(&1), Some("old".to_string()));

        assert!(wt.put(2, "fresh".to_string(), far()).await.is_err());
        assert_eq!(source.peek(&2), None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_external_write_hits_deadline() {
        let store = Arc::new(MemoryStore::<u32, String>::new());
        let source = Arc::new(MemorySource::<u32, String>::new());
        source.set_latency(Some(Duration::from_secs(2)));
        let wt = WriteThrough::new(store.clone(), source.clone());

        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            wt.put(1, "a".to_string(), deadline).await,
            Err(CacheError::DeadlineExceeded)
        );
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_acknowledged_put_is_rolled_back() {
        let store = Arc::new(MemoryStore::<u32, String>::new());
        let source = Arc::new(MemorySource::<u32, String>::with_entries([(1, "old".to_string())]));
        source.set_ack_latency(Some(Duration::from_secs(2)));
        let wt = WriteThrough::new(store.clone(), source.clone());

        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            wt.put(1, "new".to_string(), deadline).await,
            Err(CacheError::DeadlineExceeded)
        );
        assert!(store.is_empty());
        assert_eq!(source.peek(&1), Some("old".to_string()));

        assert_eq!(
            wt.put(2, "fresh".to_string(), Instant::now() + Duration::from_secs(1)).await,
            Err(CacheError::DeadlineExceeded)
        );
        assert_eq!(source.peek(&2), None);
    }

    #[tokio::test(start_paused = true)]
    async fn late_acknowledged_delete_is_rolled_back() {
        let store = Arc::new(MemoryStore::<u32, String>::new());
        let source = Arc::new(MemorySource::<u32, String>::new());
        let wt = WriteThrough::new(store.clone(), source.clone());
        wt.put(1, "kept".to_string(), far()).await.unwrap();

        source.set_ack_latency(Some(Duration::from_secs(2)));
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(wt.delete(&1, deadline).await, Err(CacheError::DeadlineExceeded));
        assert_eq!(source.peek(&1), Some("kept".to_string()));
        assert_eq!(store.get(&1).await.unwrap(), Some("kept".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_is_bounded() {
        let store = Arc::new(MemoryStore::<u32, String>::new());
        let source = Arc::new(MemorySource::<u32, String>::new());
        source.set_latency(Some(Duration::from_secs(30)));
        let wt = WriteThrough::new(store.clone(), source.clone())
            .with_rollback_timeout(Duration::from_secs(2));

        let started = Instant::now();
        let deadline = started + Duration::from_secs(40);
        assert_eq!(
            wt.put(1, "a".to_string(), deadline).await,
            Err(CacheError::DeadlineExceeded)
        );
        assert!(started.elapsed() < Duration::from_secs(45));
    }

    #[tokio::test]
    async fn miss_reads_through() {
        let store = Arc::new(MemoryStore::<u32, String>::new());
        let source = Arc::new(MemorySource::<u32, String>::with_entries([(3, "c".to_string())]));
        let wt = WriteThrough::new(store.clone(), source.clone());

        assert_eq!(wt.get(&3, far()).await.unwrap(), Some("c".to_string()));
        assert!(store.contains(&3));
    }
}
