//! Local subscription bookkeeping.
//!
//! The registry deduplicates subscriptions by `(itemName, parameters)`
//! across consumers, caches the last observed value per key, and answers
//! the one question the client core needs: "was this the first / last
//! consumer for the key?" — which is what keeps the server-side
//! subscription count at most one per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::cache::CacheAdapter;
use crate::key::SubscriptionKey;

/// A consumer callback. Identity is the `Arc` allocation: callers must
/// retain the same handle across subscribe/unsubscribe, and registering
/// the same handle twice counts as two logical entries.
pub type Consumer = Arc<dyn Fn(Value) + Send + Sync>;

/// Snapshot of one live subscription, taken for the resubscribe pass.
pub struct SubscriptionSnapshot {
    pub item: String,
    pub params: Vec<Value>,
    pub consumers: Vec<Consumer>,
}

struct Subscription {
    item: String,
    params: Vec<Value>,
    consumers: Vec<Consumer>,
    last_value: Option<Value>,
}

/// Per-key consumer sets plus a last-value cache.
///
/// One mutex serializes all mutation; consumer callbacks are always
/// invoked with the lock released, over a snapshot of the consumer list,
/// so a consumer that synchronously unsubscribes itself cannot corrupt
/// the dispatch iteration.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<SubscriptionKey, Subscription>>,
    cache: Option<Arc<dyn CacheAdapter>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry backed by an external stale-while-revalidate cache.
    pub fn with_cache(cache: Option<Arc<dyn CacheAdapter>>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            cache,
        }
    }

    /// Last value for the key, falling back to the external cache adapter.
    /// Never performs I/O.
    pub fn get_cached(&self, item: &str, params: &[Value]) -> Option<Value> {
        let key = SubscriptionKey::new(item, params);
        if let Some(value) = self
            .entries
            .lock()
            .unwrap()
            .get(&key)
            .and_then(|sub| sub.last_value.clone())
        {
            return Some(value);
        }
        self.cache.as_ref().and_then(|cache| cache.get(item, params))
    }

    /// Record a consumer for the key, set the key's last value to
    /// `initial`, write through to the external cache, and deliver
    /// `initial` to the new consumer.
    pub fn subscribe(&self, initial: Value, item: &str, params: &[Value], consumer: Consumer) {
        let key = SubscriptionKey::new(item, params);
        {
            let mut entries = self.entries.lock().unwrap();
            let subscription = entries.entry(key).or_insert_with(|| Subscription {
                item: item.to_string(),
                params: params.to_vec(),
                consumers: Vec::new(),
                last_value: None,
            });
            subscription.consumers.push(consumer.clone());
            subscription.last_value = Some(initial.clone());
        }
        self.put_cache(item, params, &initial);
        consumer(initial);
    }

    /// Remove exactly one occurrence of `consumer` (matched by handle
    /// identity; absent is a no-op). Returns `true` iff the record is now
    /// empty — the sole signal that the server-side subscription should be
    /// dropped.
    pub fn unsubscribe(&self, item: &str, params: &[Value], consumer: &Consumer) -> bool {
        let key = SubscriptionKey::new(item, params);
        let mut entries = self.entries.lock().unwrap();
        let Some(subscription) = entries.get_mut(&key) else {
            return false;
        };
        if let Some(pos) = subscription
            .consumers
            .iter()
            .position(|c| Arc::ptr_eq(c, consumer))
        {
            subscription.consumers.remove(pos);
        }
        if subscription.consumers.is_empty() {
            entries.remove(&key);
            true
        } else {
            false
        }
    }

    /// Deliver pushed data: update the last value, write through the
    /// cache, and invoke every current consumer in insertion order. Data
    /// for a key with no record is discarded silently — a push racing the
    /// last unsubscribe.
    pub fn consume(&self, item: &str, params: &[Value], data: Value) {
        let key = SubscriptionKey::new(item, params);
        let consumers = {
            let mut entries = self.entries.lock().unwrap();
            let Some(subscription) = entries.get_mut(&key) else {
                tracing::debug!(item = %item, "dropping data for unknown subscription");
                return;
            };
            subscription.last_value = Some(data.clone());
            subscription.consumers.clone()
        };
        self.put_cache(item, params, &data);
        for consumer in consumers {
            consumer(data.clone());
        }
    }

    /// Snapshot of every live subscription, for the resubscribe pass.
    pub fn subscriptions(&self) -> Vec<SubscriptionSnapshot> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .map(|sub| SubscriptionSnapshot {
                item: sub.item.clone(),
                params: sub.params.clone(),
                consumers: sub.consumers.clone(),
            })
            .collect()
    }

    /// Number of consumers attached to the key.
    pub fn consumer_count(&self, item: &str, params: &[Value]) -> usize {
        self.entries
            .lock()
            .unwrap()
            .get(&SubscriptionKey::new(item, params))
            .map_or(0, |sub| sub.consumers.len())
    }

    /// Number of live subscription keys.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write through to the external cache adapter, if configured.
    pub fn put_cache(&self, item: &str, params: &[Value], value: &Value) {
        if let Some(cache) = &self.cache {
            cache.put(item, params, value);
        }
    }
}
