//! Action result caching.
//!
//! When the broker has a cacher and an action is marked cacheable, the
//! pipeline wraps the handler: a hit short-circuits the call, a miss runs
//! the handler and stores its value. Keys combine the action name with the
//! canonical JSON of the params, so identical params map to one entry.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait Cacher: Send + Sync {
    /// Called once at broker start.
    fn init(&self, _node_id: &str) {}

    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value);
    async fn del(&self, key: &str);

    /// Remove every key matching a wildcard pattern (`*` one segment,
    /// `**` any remainder; segments are dot-separated).
    async fn clean(&self, pattern: &str);
}

/// Build the cache key for an action call.
pub fn cache_key(action: &str, params: &Value) -> String {
    // serde_json renders object keys sorted, so the text form is canonical
    format!("{}:{}", action, params)
}

/// Process-local cacher backed by a guarded map.
#[derive(Default)]
pub struct MemoryCacher {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryCacher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Cacher for MemoryCacher {
    async fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) {
        self.lock().insert(key.to_string(), value);
    }

    async fn del(&self, key: &str) {
        self.lock().remove(key);
    }

    async fn clean(&self, pattern: &str) {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !pattern_matches(pattern, key));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(pattern, removed, "cache cleaned");
        }
    }
}

/// Segment-wise wildcard match used by [`Cacher::clean`].
fn pattern_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.split_first(), key.split_first()) {
            (None, None) => true,
            (Some((&"**", _)), _) => true,
            (Some((p, p_rest)), Some((k, k_rest))) => {
                (*p == "*" || p == k) && matches(p_rest, k_rest)
            }
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}
