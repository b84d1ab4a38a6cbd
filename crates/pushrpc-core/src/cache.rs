//! Optional external value cache, consulted as a stale-while-revalidate
//! source when the registry has no in-memory value for a fresh consumer.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::key::SubscriptionKey;

/// Adapter over an external cache. Implementations must not block: the
/// registry calls `get` on the synchronous subscribe path.
pub trait CacheAdapter: Send + Sync {
    fn get(&self, item: &str, params: &[Value]) -> Option<Value>;
    fn put(&self, item: &str, params: &[Value], value: &Value);
}

/// In-memory reference adapter.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<SubscriptionKey, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheAdapter for MemoryCache {
    fn get(&self, item: &str, params: &[Value]) -> Option<Value> {
        self.entries
            .lock()
            .unwrap()
            .get(&SubscriptionKey::new(item, params))
            .cloned()
    }

    fn put(&self, item: &str, params: &[Value], value: &Value) {
        self.entries
            .lock()
            .unwrap()
            .insert(SubscriptionKey::new(item, params), value.clone());
    }
}
