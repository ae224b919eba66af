//! Round-robin replica selection for relaxed reads.
//!
//! Lock-free; one counter per zone spreads `EVENTUAL`/`WEAK` reads over
//! the serving replicas of each partition.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Next index in `0..count`, or `None` when `count` is zero.
    pub fn next(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(idx % count)
    }

    /// Pick the next candidate accepted by `usable`, trying each at most once.
    pub fn pick<'a, T>(&self, candidates: &'a [T], usable: impl Fn(&T) -> bool) -> Option<&'a T> {
        let start = self.next(candidates.len())?;
        (0..candidates.len())
            .map(|offset| &candidates[(start + offset) % candidates.len()])
            .find(|c| usable(c))
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}
