//! Per-request cache layer.

use std::collections::HashMap;

use crate::value::CacheValue;

/// Values resolved during one unit of work.
///
/// Owned by the request handler and passed by `&mut` to
/// [`SmartCache::resolve`](crate::SmartCache::resolve); never shared across
/// requests and never persisted, so it needs no locking.
#[derive(Debug, Default, Clone)]
pub struct RequestScope {
    items: HashMap<String, CacheValue>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CacheValue> {
        self.items.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: CacheValue) {
        self.items.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheValue> {
        self.items.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
