//! Store and source agreement under slow acknowledgements and
//! concurrent writers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use zonegrid_cache::{
    CacheError, CacheResult, CacheStrategy, KvStore, MemoryDeadLetters, MemorySource, MemoryStore,
    WriteBehind, WriteBehindConfig, WriteThrough,
};
use zonegrid_core::config::OverflowPolicy;

fn far() -> Instant {
    Instant::now() + Duration::from_secs(600)
}

/// Store that commits every write at once but answers late for one value.
struct LateStore {
    inner: Arc<MemoryStore<u32, String>>,
    late_value: &'static str,
    delay: Duration,
}

#[async_trait]
impl KvStore<u32, String> for LateStore {
    async fn get(&self, key: &u32) -> CacheResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: u32, value: String) -> CacheResult<()> {
        let late = value == self.late_value;
        self.inner.put(key, value).await?;
        if late {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }

    async fn delete(&self, key: &u32) -> CacheResult<bool> {
        self.inner.delete(key).await
    }
}

fn behind_config() -> WriteBehindConfig {
    WriteBehindConfig {
        capacity: 100,
        batch_size: 100,
        flush_interval: Duration::from_secs(600),
        max_retries: 0,
        retry_backoff: Duration::from_millis(10),
        overflow: OverflowPolicy::Block,
    }
}

#[tokio::test(start_paused = true)]
async fn write_behind_flushes_concurrent_puts_in_store_order() {
    let inner = Arc::new(MemoryStore::<u32, String>::new());
    let store = Arc::new(LateStore {
        inner: inner.clone(),
        late_value: "A",
        delay: Duration::from_millis(50),
    });
    let source = Arc::new(MemorySource::<u32, String>::new());
    let wb = Arc::new(WriteBehind::new(
        store,
        source.clone(),
        Arc::new(MemoryDeadLetters::new()),
        behind_config(),
    ));

    let first = tokio::spawn({
        let wb = wb.clone();
        async move { wb.put(1, "A".to_string(), far()).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    wb.put(1, "B".to_string(), far()).await.unwrap();
    first.await.unwrap().unwrap();

    wb.flush_now().await;
    assert_eq!(inner.get(&1).await.unwrap(), Some("B".to_string()));
    assert_eq!(source.peek(&1), Some("B".to_string()));
    wb.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn write_behind_other_keys_do_not_wait() {
    let inner = Arc::new(MemoryStore::<u32, String>::new());
    let store = Arc::new(LateStore {
        inner: inner.clone(),
        late_value: "slow",
        delay: Duration::from_secs(5),
    });
    let source = Arc::new(MemorySource::<u32, String>::new());
    let wb = Arc::new(WriteBehind::new(
        store,
        source.clone(),
        Arc::new(MemoryDeadLetters::new()),
        behind_config(),
    ));

    // Keys are striped, so a neighbour may share the slow key's lock.
    // Walk forward until one does not.
    let slow = tokio::spawn({
        let wb = wb.clone();
        async move { wb.put(1, "slow".to_string(), far()).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = Instant::now();
    let mut other = 2u32;
    loop {
        let deadline = Instant::now() + Duration::from_secs(1);
        match wb.put(other, "quick".to_string(), deadline).await {
            Ok(()) => break,
            Err(CacheError::DeadlineExceeded) => other += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    slow.await.unwrap().unwrap();
    wb.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn write_through_timeout_keeps_both_sides_on_the_old_value() {
    let store = Arc::new(MemoryStore::<u32, String>::new());
    let source = Arc::new(MemorySource::<u32, String>::with_entries([(1, "old".to_string())]));
    let wt = WriteThrough::new(store.clone(), source.clone());
    assert_eq!(wt.get(&1, far()).await.unwrap(), Some("old".to_string()));

    source.set_ack_latency(Some(Duration::from_secs(2)));
    let deadline = Instant::now() + Duration::from_secs(1);
    assert_eq!(
        wt.put(1, "new".to_string(), deadline).await,
        Err(CacheError::DeadlineExceeded)
    );

    source.set_ack_latency(None);
    assert_eq!(source.peek(&1), Some("old".to_string()));
    assert_eq!(wt.get(&1, far()).await.unwrap(), Some("old".to_string()));
}
