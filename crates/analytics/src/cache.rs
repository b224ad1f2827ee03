//! Bounded, optionally TTL'd cache for fitted models
//!
//! Trained forecaster models and fitted scalers are expensive to rebuild
//! and cheap to hold, but holding them forever means unbounded memory and
//! silently stale models. This cache makes both policies explicit:
//! capacity-bounded with least-recently-used eviction, and an optional
//! time-to-live measured from insertion (model age, not access recency).
//!
//! Lookups that race with a concurrent build may both construct a value;
//! the last completed insert wins and the loser's work is discarded. No
//! lock is held while a builder runs.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct CacheEntry<T> {
    value: Arc<T>,
    inserted_at: Instant,
    last_used: Instant,
}

/// Capacity-bounded model cache keyed by string (typically `metric:service`)
#[derive(Debug)]
pub struct ModelCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl<T> ModelCache<T> {
    /// A cache holding at most `capacity` entries; entries older than
    /// `ttl` (when set) are treated as absent.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Fetch a live entry, refreshing its recency. Expired entries are
    /// removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        let expired = match self.entries.get_mut(key) {
            Some(mut entry) => {
                if self.is_expired(entry.inserted_at) {
                    true
                } else {
                    entry.last_used = Instant::now();
                    return Some(Arc::clone(&entry.value));
                }
            }
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            debug!(key, "evicted expired cache entry");
        }
        None
    }

    /// Insert a value, evicting least-recently-used entries if the cache
    /// is over capacity afterwards.
    pub fn insert(&self, key: &str, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: Arc::clone(&value),
                inserted_at: now,
                last_used: now,
            },
        );
        self.evict_over_capacity();
        value
    }

    /// Fetch a live entry or build one with `build` and insert it.
    ///
    /// `build` runs without any cache lock held; two callers missing on
    /// the same key will both build.
    pub fn get_or_insert_with(&self, key: &str, build: impl FnOnce() -> T) -> Arc<T> {
        if let Some(value) = self.get(key) {
            return value;
        }
        self.insert(key, build())
    }

    /// Drop one entry (e.g. to force a retrain after known drift)
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, inserted_at: Instant) -> bool {
        match self.ttl {
            Some(ttl) => inserted_at.elapsed() > ttl,
            None => false,
        }
    }

    fn evict_over_capacity(&self) {
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.last_used)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    debug!(key, "evicted least-recently-used cache entry");
                }
                None => break,
            }
        }
    }
}
