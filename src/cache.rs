//! A small TTL-keyed cache used by the `Cache` surface on
//! [`crate::context::ExecutionContext`]. Entries past their TTL are treated
//! as absent and lazily swept on access.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::value::Value;

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// Concurrent, TTL-aware cache of [`Value`]s keyed by string.
pub struct ValueCache {
    entries: DashMap<String, Entry>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.insert(key.into(), Entry { value, expires_at });
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => match entry.expires_at {
                Some(exp) => Instant::now() >= exp,
                None => false,
            },
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, e)| e.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ValueCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let cache = ValueCache::new();
        cache.set("k", Value::Number(1.0), None);
        assert_eq!(cache.get("k"), Some(Value::Number(1.0)));
    }

    #[test]
    fn expired_entry_is_absent() {
        let cache = ValueCache::new();
        cache.set("k", Value::Number(1.0), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        assert!(!cache.contains("k"));
    }

    #[test]
    fn missing_key_is_none() {
        let cache = ValueCache::new();
        assert_eq!(cache.get("nope"), None);
    }
}
