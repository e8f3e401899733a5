//! TTL cache with tag-based invalidation
//!
//! Records delivery state per content+platform pair so callers can check the
//! last outcome without a remote call. Entries carry an expiry and a set of
//! invalidation tags; `invalidate(tag)` drops every entry sharing the tag
//! (e.g. all cached state for one content id). Writes are last-writer-wins
//! with no cross-key guarantees.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

struct CacheEntry {
    value: Value,
    expires_at: Instant,
    tags: Vec<String>,
}

/// In-memory TTL cache. Cheap to share behind an `Arc`.
pub struct CacheManager {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or overwrite an entry. Last writer wins.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration, tags: Vec<String>) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
            tags,
        };
        self.entries.lock().unwrap().insert(key.into(), entry);
    }

    /// Fetch a value. An entry past its expiry is a miss and is removed.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Remove a single entry. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    /// Remove every entry carrying `tag`. Returns the number removed.
    pub fn invalidate(&self, tag: &str) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
        before - entries.len()
    }

    /// Drop expired entries eagerly. `get` already treats them as misses;
    /// this just reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}
