//! One store, one source, three strategies.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aside::CacheAside;
use crate::behind::{WriteBehind, WriteBehindConfig};
use crate::error::CacheResult;
use crate::through::WriteThrough;
use crate::traits::{
    CacheKey, CacheStrategy, CacheValue, DeadLetterSink, Deadline, ExternalSource, KvStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    Aside,
    Through,
    Behind,
}

/// The three strategies over a shared store and external source.
///
/// Mixing modes on the same key is allowed but gives the weakest of the
/// guarantees involved.
pub struct CacheLayer<K, V> {
    aside: CacheAside<K, V>,
    through: WriteThrough<K, V>,
    behind: WriteBehind<K, V>,
}

impl<K: CacheKey, V: CacheValue> CacheLayer<K, V> {
    /// Must be called inside a tokio runtime (spawns the write-behind flusher).
    pub fn new(
        store: Arc<dyn KvStore<K, V>>,
        source: Arc<dyn ExternalSource<K, V>>,
        dead_letters: Arc<dyn DeadLetterSink<K, V>>,
        config: WriteBehindConfig,
    ) -> Self {
        Self {
            aside: CacheAside::new(store.clone(), source.clone()),
            through: WriteThrough::new(store.clone(), source.clone()),
            behind: WriteBehind::new(store, source, dead_letters, config),
        }
    }

    pub fn strategy(&self, mode: CacheMode) -> &dyn CacheStrategy<K, V> {
        match mode {
            CacheMode::Aside => &self.aside,
            CacheMode::Through => &self.through,
            CacheMode::Behind => &self.behind,
        }
    }

    pub fn aside(&self) -> &CacheAside<K, V> {
        &self.aside
    }

    pub fn write_behind(&self) -> &WriteBehind<K, V> {
        &self.behind
    }

    pub async fn get(&self, mode: CacheMode, key: &K, deadline: Deadline) -> CacheResult<Option<V>> {
        self.strategy(mode).get(key, deadline).await
    }

    pub async fn put(&self, mode: CacheMode, key: K, value: V, deadline: Deadline) -> CacheResult<()> {
        self.strategy(mode).put(key, value, deadline).await
    }

    pub async fn delete(&self, mode: CacheMode, key: &K, deadline: Deadline) -> CacheResult<()> {
        self.strategy(mode).delete(key, deadline).await
    }

    /// Drain write-behind and stop its flusher.
    pub async fn shutdown(&self) {
        self.behind.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::memory::{MemoryDeadLetters, MemorySource, MemoryStore};

    #[tokio::test(start_paused = true)]
    async fn modes_share_one_store() {
        let store = Arc::new(MemoryStore::<String, i64>::new());
        let source = Arc::new(MemorySource::<String, i64>::new());
        let layer = CacheLayer::new(
            store.clone(),
            source.clone(),
            Arc::new(MemoryDeadLetters::<String, i64>::new()),
            WriteBehindConfig::default(),
        );
        let deadline = Instant::now() + Duration::from_secs(5);

        layer.put(CacheMode::Through, "a".to_string(), 1, deadline).await.unwrap();
        layer.put(CacheMode::Behind, "b".to_string(), 2, deadline).await.unwrap();
        assert_eq!(source.peek(&"a".to_string()), Some(1));
        assert_eq!(source.peek(&"b".to_string()), None);

        assert_eq!(layer.get(CacheMode::Aside, &"b".to_string(), deadline).await.unwrap(), Some(2));
        assert_eq!(source.load_calls(), 1);

        layer.shutdown().await;
        assert_eq!(source.peek(&"b".to_string()), Some(2));
    }
}
