//! Access counters keyed by dotted path.
//!
//! A [`CounterRegistry`] is created by whoever owns a partition or a merge and
//! handed to every component that reports counts. Counters are created on
//! first use and live as long as the registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct AccessCounter {
    value: AtomicU64,
}

impl AccessCounter {
    pub fn increase(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of [`AccessCounter`]s.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: RwLock<BTreeMap<String, Arc<AccessCounter>>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the counter at `path`, creating it on first use.
    pub fn get_or_create(&self, path: &str) -> Arc<AccessCounter> {
        if let Some(counter) = self.counters.read().get(path) {
            return Arc::clone(counter);
        }
        let mut counters = self.counters.write();
        Arc::clone(counters.entry(path.to_string()).or_default())
    }

    /// Current value of `path`, or `None` if nothing created it yet.
    pub fn value(&self, path: &str) -> Option<u64> {
        self.counters.read().get(path).map(|c| c.get())
    }

    /// All counters and their values, sorted by path.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .read()
            .iter()
            .map(|(path, counter)| (path.clone(), counter.get()))
            .collect()
    }
}
