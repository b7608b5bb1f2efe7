//! A keyed store with FIFO overflow eviction and TTL expiry, checked on
//! every access. Iteration order is insertion order; touching an entry
//! (a successful `get`, or a `set` that overwrites an existing key) moves
//! it to the most-recent position.

use anyhow::{bail, Result};
use indexmap::IndexMap;
use std::sync::Arc;

/// A source of "now", in whole seconds. Production code uses
/// [`system_clock`]; tests substitute a manually-advanced clock so
/// TTL behavior is deterministic.
pub type ClockFn = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> ClockFn {
    Arc::new(|| chrono::Utc::now().timestamp())
}

struct Entry<V> {
    value: V,
    last_seen_at: i64,
}

pub struct BoundedStore<V> {
    max_size: usize,
    ttl_seconds: i64,
    clock: ClockFn,
    entries: IndexMap<String, Entry<V>>,
}

impl<V: Clone> BoundedStore<V> {
    pub fn new(max_size: usize, ttl_seconds: i64, clock: ClockFn) -> Result<Self> {
        if max_size == 0 {
            bail!("BoundedStore: max_size must be > 0");
        }
        if ttl_seconds <= 0 {
            bail!("BoundedStore: ttl_seconds must be > 0");
        }
        Ok(Self {
            max_size,
            ttl_seconds,
            clock,
            entries: IndexMap::new(),
        })
    }

    pub fn with_system_clock(max_size: usize, ttl_seconds: i64) -> Result<Self> {
        Self::new(max_size, ttl_seconds, system_clock())
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    fn evict_expired(&mut self, now: i64) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now - e.last_seen_at > self.ttl_seconds)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.entries.shift_remove(&key);
        }
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.max_size {
            self.entries.shift_remove_index(0);
        }
    }

    /// Returns the value if present and unexpired. A hit refreshes
    /// `last_seen_at` and moves the entry to the most-recent position.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = (self.clock)();
        self.evict_expired(now);
        if !self.entries.contains_key(key) {
            return None;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_seen_at = now;
        }
        self.entries.move_index(
            self.entries.get_index_of(key).expect("just checked"),
            self.entries.len() - 1,
        );
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Inserts or overwrites `key`. Re-insertion of an existing key is
    /// treated as a fresh write: the entry is removed then re-appended,
    /// so it becomes the most-recent entry.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = (self.clock)();
        self.evict_expired(now);
        self.entries.shift_remove(&key);
        self.entries.insert(
            key,
            Entry {
                value,
                last_seen_at: now,
            },
        );
        self.evict_overflow();
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    /// Current unexpired keys, insertion order (oldest first).
    pub fn keys(&mut self) -> Vec<String> {
        let now = (self.clock)();
        self.evict_expired(now);
        self.entries.keys().cloned().collect()
    }

    /// Current unexpired values, insertion order (oldest first).
    pub fn values(&mut self) -> Vec<V> {
        let now = (self.clock)();
        self.evict_expired(now);
        self.entries.values().map(|e| e.value.clone()).collect()
    }

    pub fn len(&mut self) -> usize {
        let now = (self.clock)();
        self.evict_expired(now);
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }
}
