//! Striped per-key locks.
//!
//! Keys hash onto a fixed set of async mutexes. Two keys may share a
//! stripe; one key always maps to the same stripe.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

const LOCK_STRIPES: usize = 64;

pub(crate) struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) async fn lock<K: Hash>(&self, key: &K) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.stripes[hasher.finish() as usize % LOCK_STRIPES].lock().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_waits_for_the_holder() {
        let locks = KeyLocks::new();
        let guard = locks.lock(&7u32).await;
        let waiting = tokio::time::timeout(Duration::from_millis(20), locks.lock(&7u32)).await;
        assert!(waiting.is_err());
        drop(guard);
        let _again = locks.lock(&7u32).await;
    }
}
