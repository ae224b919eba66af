//! Write-behind.
//!
//! Writes land in the store synchronously and are queued for the external
//! system. A background flusher drains the queue in batches whenever the
//! batch size is reached or the flush interval elapses, whichever comes
//! first.
//!
//! Entry lifecycle: buffered, then in flight, then flushed. A failed batch
//! is retried as a whole (bounded) before any newer entry is taken, and
//! entries that exhaust their retries go to the dead-letter sink.
//!
//! The buffer is bounded by a semaphore. Capacity is reserved before the
//! store is touched, so a rejected write leaves no trace. A per-key lock
//! spans the store write and the enqueue, so the queue holds each key's
//! changes in the order the store applied them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use zonegrid_core::config::{OverflowPolicy, WriteBehindSettings};

use crate::error::{CacheError, CacheResult};
use crate::locks::KeyLocks;
use crate::traits::{
    CacheKey, CacheStrategy, CacheValue, Change, DeadLetter, DeadLetterSink, Deadline,
    ExternalSource, KvStore, within,
};

/// Write-behind tuning.
#[derive(Debug, Clone)]
pub struct WriteBehindConfig {
    /// Maximum buffered (not yet flushed) entries.
    pub capacity: usize,
    /// Entries per external batch; also the size trigger for a flush.
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Retries of a failed batch before its entries are dead-lettered.
    pub max_retries: u32,
    /// Base delay between retries; grows linearly with the attempt.
    pub retry_backoff: Duration,
    pub overflow: OverflowPolicy,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self::from(&WriteBehindSettings::default())
    }
}

impl From<&WriteBehindSettings> for WriteBehindConfig {
    fn from(s: &WriteBehindSettings) -> Self {
        Self {
            capacity: s.capacity.max(1),
            batch_size: s.batch_size.max(1),
            flush_interval: Duration::from_millis(s.flush_interval_ms.max(1)),
            max_retries: s.max_retries,
            retry_backoff: Duration::from_millis(s.retry_backoff_ms),
            overflow: s.overflow,
        }
    }
}

/// Point-in-time write-behind counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteBehindStats {
    pub buffered: u64,
    pub in_flight: u64,
    pub flushed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

#[derive(Default)]
struct Counters {
    buffered: AtomicU64,
    in_flight: AtomicU64,
    flushed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WriteBehindStats {
        WriteBehindStats {
            buffered: self.buffered.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

struct Buffer<K, V> {
    queue: VecDeque<(K, Change<V>)>,
    /// Unflushed changes per key, buffered or in flight.
    pending: HashMap<K, usize>,
}

impl<K: CacheKey, V> Buffer<K, V> {
    fn settle(&mut self, keys: impl Iterator<Item = K>) {
        for key in keys {
            if let Some(n) = self.pending.get_mut(&key) {
                *n -= 1;
                if *n == 0 {
                    self.pending.remove(&key);
                }
            }
        }
    }
}

struct Shared<K, V> {
    store: Arc<dyn KvStore<K, V>>,
    source: Arc<dyn ExternalSource<K, V>>,
    dead_letters: Arc<dyn DeadLetterSink<K, V>>,
    config: WriteBehindConfig,
    buffer: Mutex<Buffer<K, V>>,
    capacity: Semaphore,
    locks: KeyLocks,
    wake: Notify,
    /// Only one flush cycle runs at a time.
    flushing: tokio::sync::Mutex<()>,
    counters: Counters,
    closed: AtomicBool,
}

pub struct WriteBehind<K, V> {
    shared: Arc<Shared<K, V>>,
    shutdown: watch::Sender<bool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl<K: CacheKey, V: CacheValue> WriteBehind<K, V> {
    /// Create the strategy and spawn its flusher on the current runtime.
    pub fn new(
        store: Arc<dyn KvStore<K, V>>,
        source: Arc<dyn ExternalSource<K, V>>,
        dead_letters: Arc<dyn DeadLetterSink<K, V>>,
        config: WriteBehindConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            store,
            source,
            dead_letters,
            capacity: Semaphore::new(config.capacity),
            locks: KeyLocks::new(),
            config,
            buffer: Mutex::new(Buffer {
                queue: VecDeque::new(),
                pending: HashMap::new(),
            }),
            wake: Notify::new(),
            flushing: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
            closed: AtomicBool::new(false),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let flusher = tokio::spawn(run_flusher(shared.clone(), shutdown_rx));

        Self {
            shared,
            shutdown,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    pub fn stats(&self) -> WriteBehindStats {
        self.shared.counters.snapshot()
    }

    /// Entries not yet handed to the external system.
    pub fn buffered(&self) -> usize {
        self.shared.buffer.lock().queue.len()
    }

    /// Run one flush cycle now. Returns the entries flushed.
    pub async fn flush_now(&self) -> usize {
        self.shared.flush_cycle().await
    }

    /// Stop accepting writes, drain the buffer and stop the flusher.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        let handle = self.flusher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "write-behind flusher panicked");
            }
        }
        info!(stats = ?self.stats(), "write-behind shut down");
    }

    async fn enqueue(&self, key: K, change: Change<V>, deadline: Deadline) -> CacheResult<()> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }

        let permit = match shared.config.overflow {
            OverflowPolicy::Fail => shared.capacity.try_acquire().map_err(|_| {
                warn!(capacity = shared.config.capacity, "write-behind buffer full");
                CacheError::BufferFull {
                    capacity: shared.config.capacity,
                }
            })?,
            OverflowPolicy::Block => within(deadline, async {
                Ok(shared.capacity.acquire().await?)
            })
            .await?,
        };

        let _key = within(deadline, async { Ok(shared.locks.lock(&key).await) }).await?;
        let stored = match &change {
            Change::Put(value) => shared.store.put(key.clone(), value.clone()).await,
            Change::Delete => shared.store.delete(&key).await.map(|_| ()),
        };
        stored?;
        // Released when the entry is flushed or dead-lettered.
        permit.forget();

        let queued = {
            let mut buffer = shared.buffer.lock();
            *buffer.pending.entry(key.clone()).or_insert(0) += 1;
            buffer.queue.push_back((key, change));
            buffer.queue.len()
        };
        shared.counters.buffered.fetch_add(1, Ordering::Relaxed);
        if queued >= shared.config.batch_size {
            shared.wake.notify_one();
        }
        Ok(())
    }
}

impl<K: CacheKey, V: CacheValue> Shared<K, V> {
    async fn flush_cycle(&self) -> usize {
        let _flushing = self.flushing.lock().await;
        let mut flushed = 0;
        loop {
            let batch: Vec<(K, Change<V>)> = {
                let mut buffer = self.buffer.lock();
                let n = buffer.queue.len().min(self.config.batch_size);
                buffer.queue.drain(..n).collect()
            };
            if batch.is_empty() {
                break;
            }
            let n = batch.len() as u64;
            self.counters.buffered.fetch_sub(n, Ordering::Relaxed);
            self.counters.in_flight.fetch_add(n, Ordering::Relaxed);

            if self.flush_batch(&batch).await {
                flushed += batch.len();
            }

            self.counters.in_flight.fetch_sub(n, Ordering::Relaxed);
            self.buffer.lock().settle(batch.into_iter().map(|(k, _)| k));
            self.capacity.add_permits(n as usize);
        }
        flushed
    }

    /// Ship one batch, retrying it as a whole. Returns false when the
    /// batch was dead-lettered.
    async fn flush_batch(&self, batch: &[(K, Change<V>)]) -> bool {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.source.apply_batch(batch).await {
                Ok(()) => {
                    self.counters
                        .flushed
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    debug!(entries = batch.len(), attempts, "write-behind batch flushed");
                    return true;
                }
                Err(e) if attempts <= self.config.max_retries => {
                    self.counters
                        .retried
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    warn!(
                        entries = batch.len(),
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "write-behind flush failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempts).await;
                }
                Err(e) => {
                    error!(
                        entries = batch.len(),
                        attempts,
                        error = %e,
                        "write-behind batch dead-lettered"
                    );
                    for (key, change) in batch {
                        self.dead_letters
                            .dead_letter(DeadLetter {
                                key: key.clone(),
                                change: change.clone(),
                                attempts,
                                error: e.to_string(),
                            })
                            .await;
                    }
                    self.counters
                        .dead_lettered
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    return false;
                }
            }
        }
    }

    fn has_pending(&self, key: &K) -> bool {
        self.buffer.lock().pending.contains_key(key)
    }
}

async fn run_flusher<K: CacheKey, V: CacheValue>(
    shared: Arc<Shared<K, V>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(shared.config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.wake.notified() => {}
            _ = shutdown.changed() => {
                let drained = shared.flush_cycle().await;
                debug!(drained, "write-behind flusher stopped");
                return;
            }
        }
        shared.flush_cycle().await;
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> CacheStrategy<K, V> for WriteBehind<K, V> {
    async fn get(&self, key: &K, deadline: Deadline) -> CacheResult<Option<V>> {
        let shared = &self.shared;
        if let Some(value) = shared.store.get(key).await? {
            return Ok(Some(value));
        }
        // The store is authoritative while a change is unflushed; a miss
        // here is a buffered delete, not a reason to reload.
        if shared.has_pending(key) {
            return Ok(None);
        }
        let loaded = within(deadline, shared.source.load(key)).await?;
        if let Some(value) = &loaded {
            shared.store.put(key.clone(), value.clone()).await?;
        }
        Ok(loaded)
    }

    async fn put(&self, key: K, value: V, deadline: Deadline) -> CacheResult<()> {
        self.enqueue(key, Change::Put(value), deadline).await
    }

    async fn delete(&self, key: &K, deadline: Deadline) -> CacheResult<()> {
        self.enqueue(key.clone(), Change::Delete, deadline).await
    }
}
