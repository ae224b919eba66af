//! In-memory implementations of the cache seams.
//!
//! [`MemoryStore`] is the default cache store. [`MemorySource`] is an
//! in-process system of record with call counters and fault switches,
//! mostly useful in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheKey, CacheValue, Change, DeadLetter, DeadLetterSink, ExternalSource, KvStore};

pub struct MemoryStore<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K: CacheKey, V: CacheValue> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }
}

impl<K: CacheKey, V: CacheValue> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> KvStore<K, V> for MemoryStore<K, V> {
    async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: K, value: V) -> CacheResult<()> {
        self.entries.write().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &K) -> CacheResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }
}

/// In-process system of record.
pub struct MemorySource<K, V> {
    entries: RwLock<HashMap<K, V>>,
    loads: AtomicU64,
    saves: AtomicU64,
    batches: AtomicU64,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    latency: Mutex<Option<Duration>>,
    ack_latency: Mutex<Option<Duration>>,
}

impl<K: CacheKey, V: CacheValue> MemorySource<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            loads: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            fail_loads: AtomicBool::new(false),
            fail_saves: AtomicBool::new(false),
            latency: Mutex::new(None),
            ack_latency: Mutex::new(None),
        }
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        let source = Self::new();
        source.entries.write().extend(entries);
        source
    }

    /// Read without counting as a load.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn load_calls(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Individual saves and removes, batched or not.
    pub fn save_calls(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn batch_calls(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::Relaxed);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Relaxed);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Delay the acknowledgement of every write by `latency`. The write
    /// itself commits before the delay, like a remote system whose reply
    /// is slow.
    pub fn set_ack_latency(&self, latency: Option<Duration>) {
        *self.ack_latency.lock() = latency;
    }

    async fn acknowledge(&self) {
        let latency = *self.ack_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writable(&self) -> CacheResult<()> {
        if self.fail_saves.load(Ordering::Relaxed) {
            return Err(CacheError::SourceUnavailable("injected save failure".to_string()));
        }
        Ok(())
    }
}

impl<K: CacheKey, V: CacheValue> Default for MemorySource<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> ExternalSource<K, V> for MemorySource<K, V> {
    async fn load(&self, key: &K) -> CacheResult<Option<V>> {
        self.simulate_latency().await;
        self.loads.fetch_add(1, Ordering::Relaxed);
        if self.fail_loads.load(Ordering::Relaxed) {
            return Err(CacheError::SourceUnavailable("injected load failure".to_string()));
        }
        Ok(self.entries.read().get(key).cloned())
    }

    async fn save(&self, key: &K, value: &V) -> CacheResult<()> {
        self.simulate_latency().await;
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.check_writable()?;
        self.entries.write().insert(key.clone(), value.clone());
        self.acknowledge().await;
        Ok(())
    }

    async fn remove(&self, key: &K) -> CacheResult<()> {
        self.simulate_latency().await;
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.check_writable()?;
        self.entries.write().remove(key);
        self.acknowledge().await;
        Ok(())
    }

    async fn apply_batch(&self, changes: &[(K, Change<V>)]) -> CacheResult<()> {
        self.simulate_latency().await;
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.saves.fetch_add(changes.len() as u64, Ordering::Relaxed);
        self.check_writable()?;

        {
            let mut entries = self.entries.write();
            for (key, change) in changes {
                match change {
                    Change::Put(value) => {
                        entries.insert(key.clone(), value.clone());
                    }
                    Change::Delete => {
                        entries.remove(key);
                    }
                }
            }
        }
        self.acknowledge().await;
        Ok(())
    }
}

/// Dead letters kept in memory for inspection.
pub struct MemoryDeadLetters<K, V> {
    entries: Mutex<Vec<DeadLetter<K, V>>>,
}

impl<K: CacheKey, V: CacheValue> MemoryDeadLetters<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<DeadLetter<K, V>> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: CacheKey, V: CacheValue> Default for MemoryDeadLetters<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> DeadLetterSink<K, V> for MemoryDeadLetters<K, V> {
    async fn dead_letter(&self, entry: DeadLetter<K, V>) {
        self.entries.lock().push(entry);
    }
}
