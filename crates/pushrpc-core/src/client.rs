//! Client core: routes consumer-facing operations into the right sequence
//! of registry, HTTP and push-channel actions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::CacheAdapter;
use crate::error::RpcError;
use crate::key::{ClientId, SubscriptionKey};
use crate::middleware::{with_middlewares, InvocationCtx, InvocationType, Invoke, Middleware};
use crate::registry::{Consumer, SubscriptionRegistry};
use crate::transport::{CallTransport, PushHandler, PushTransport};

/// Per-invocation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Deadline override for this invocation; `None` uses the client's
    /// default `call_timeout`.
    pub timeout: Option<Duration>,
}

/// Client-level configuration.
pub struct RpcClientConfig {
    /// Stable identity transmitted on every request; generated if not set.
    pub client_id: ClientId,
    /// Default per-call deadline.
    pub call_timeout: Duration,
    /// Whether push delivery is enabled. When `false`, subscribes degrade
    /// to one-shot calls and no server-side subscription is created.
    pub pushes: bool,
    /// Optional stale-while-revalidate cache adapter.
    pub cache: Option<Arc<dyn CacheAdapter>>,
    /// Chain applied to every invocation, outermost first.
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            client_id: ClientId::generate(),
            call_timeout: Duration::from_secs(30),
            pushes: true,
            cache: None,
            middleware: Vec::new(),
        }
    }
}

/// The RPC client core.
///
/// Owns the subscription registry and the command transport; optionally
/// holds a push channel for server-triggered delivery. All methods take
/// `&self`; share the client with `Arc` across tasks.
pub struct RpcClient {
    shared: Arc<ClientShared>,
    push: Option<Arc<dyn PushTransport>>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn CallTransport>, config: RpcClientConfig) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                client_id: config.client_id,
                registry: SubscriptionRegistry::with_cache(config.cache),
                pending: PendingSubscribes::default(),
                transport,
                middleware: config.middleware,
                call_timeout: config.call_timeout,
                pushes: config.pushes,
            }),
            push: None,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.shared.client_id
    }

    /// The local registry. Exposed for introspection; mutation goes
    /// through [`subscribe`](Self::subscribe) / [`unsubscribe`](Self::unsubscribe).
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.shared.registry
    }

    /// Handler to wire into a push channel's constructor. Data frames feed
    /// the registry; reconnects trigger the resubscribe pass.
    pub fn push_handler(&self) -> Arc<dyn PushHandler> {
        Arc::new(ClientPushHandler {
            shared: self.shared.clone(),
        })
    }

    /// Attach the push channel. Call before sharing the client.
    pub fn set_push(&mut self, push: Arc<dyn PushTransport>) {
        self.push = Some(push);
    }

    /// Invoke an item and return the decoded result.
    pub async fn call(&self, item: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        self.call_with(item, params, CallOptions::default()).await
    }

    pub async fn call_with(
        &self,
        item: &str,
        params: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        self.shared
            .invoke(InvocationType::Call, item, params, options.timeout)
            .await
    }

    /// Attach `consumer` to the key.
    ///
    /// The consumer observes the cached value (if any) synchronously, then
    /// the authoritative initial value from the server, then every pushed
    /// update. On error nothing is recorded and nothing further is
    /// delivered beyond the cached value.
    pub async fn subscribe(
        &self,
        item: &str,
        params: Vec<Value>,
        consumer: Consumer,
    ) -> Result<(), RpcError> {
        self.subscribe_with(item, params, consumer, CallOptions::default())
            .await
    }

    pub async fn subscribe_with(
        &self,
        item: &str,
        params: Vec<Value>,
        consumer: Consumer,
        options: CallOptions,
    ) -> Result<(), RpcError> {
        // Stale-while-revalidate: deliver the cached value before any
        // network round trip.
        if let Some(cached) = self.shared.registry.get_cached(item, &params) {
            consumer(cached);
        }

        if !self.shared.pushes {
            // Degraded mode: one-shot call, no server-side subscription.
            let value = self
                .shared
                .invoke(InvocationType::Subscribe, item, params.clone(), options.timeout)
                .await?;
            self.shared.registry.put_cache(item, &params, &value);
            consumer(value);
            return Ok(());
        }

        // Bring the socket up in the background; its failure must not
        // affect the subscribe.
        if let Some(push) = &self.push {
            push.connect();
        }

        let key = SubscriptionKey::new(item, &params);
        self.shared.pending.begin(key.clone(), &consumer);
        match self
            .shared
            .invoke_subscribe(item, params.clone(), options.timeout)
            .await
        {
            Ok(initial) => {
                if self.shared.pending.finish(&key, &consumer) {
                    self.shared
                        .registry
                        .subscribe(initial, item, &params, consumer);
                } else {
                    // Unsubscribed while the request was in flight. The
                    // server recorded the subscription, so compensate
                    // unless someone else still wants the key.
                    tracing::debug!(item = %item, "subscribe cancelled while in flight");
                    if self.shared.registry.consumer_count(item, &params) == 0
                        && !self.shared.pending.has_live(&key)
                    {
                        self.shared.server_unsubscribe(item, &params).await;
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.shared.pending.finish(&key, &consumer);
                Err(e)
            }
        }
    }

    /// Detach one occurrence of `consumer` from the key. When the last
    /// local consumer is gone the server-side subscription is dropped;
    /// errors on that leg are logged, never raised.
    pub async fn unsubscribe(&self, item: &str, params: &[Value], consumer: &Consumer) {
        let key = SubscriptionKey::new(item, params);
        if self.shared.pending.cancel(&key, consumer) {
            // The initial subscribe has not resolved yet; compensation
            // happens at resolution.
            return;
        }
        if self.shared.registry.unsubscribe(item, params, consumer) {
            self.shared.server_unsubscribe(item, params).await;
        }
    }

    /// Release the push channel. The registry is left intact: consumers
    /// keep their handlers and cached values, and the next successful
    /// connect rebuilds the server state via the resubscribe pass.
    pub fn close(&self) {
        if let Some(push) = &self.push {
            push.close();
        }
    }
}

struct ClientShared {
    client_id: ClientId,
    registry: SubscriptionRegistry,
    pending: PendingSubscribes,
    transport: Arc<dyn CallTransport>,
    middleware: Vec<Arc<dyn Middleware>>,
    call_timeout: Duration,
    pushes: bool,
}

impl ClientShared {
    fn ctx(&self, invocation_type: InvocationType, item: &str) -> InvocationCtx {
        InvocationCtx {
            client_id: self.client_id.clone(),
            item: item.to_string(),
            invocation_type,
        }
    }

    /// Middleware-wrapped `CallTransport::call`. Also serves the degraded
    /// subscribe path, which keeps its `Subscribe` invocation type.
    async fn invoke(
        &self,
        invocation_type: InvocationType,
        item: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let ctx = self.ctx(invocation_type, item);
        let endpoint = CallEndpoint {
            transport: self.transport.as_ref(),
            timeout: Some(timeout.unwrap_or(self.call_timeout)),
        };
        with_middlewares(&self.middleware, &ctx, &endpoint, params).await
    }

    async fn invoke_subscribe(
        &self,
        item: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let ctx = self.ctx(InvocationType::Subscribe, item);
        let endpoint = SubscribeEndpoint {
            transport: self.transport.as_ref(),
            timeout: Some(timeout.unwrap_or(self.call_timeout)),
        };
        with_middlewares(&self.middleware, &ctx, &endpoint, params).await
    }

    /// Fire-and-forget server-side unsubscribe: local state is already
    /// reconciled, so failures are logged and swallowed.
    async fn server_unsubscribe(&self, item: &str, params: &[Value]) {
        let ctx = self.ctx(InvocationType::Unsubscribe, item);
        let endpoint = UnsubscribeEndpoint {
            transport: self.transport.as_ref(),
        };
        if let Err(e) = with_middlewares(&self.middleware, &ctx, &endpoint, params.to_vec()).await
        {
            tracing::warn!(item = %item, error = %e, "server-side unsubscribe failed");
        }
    }

    /// Post-reconnect pass: re-register every live key and feed the fresh
    /// value to its consumers. A key whose resubscribe fails is considered
    /// irrecoverable for this generation and its consumers are detached.
    async fn resubscribe(&self) {
        let snapshot = self.registry.subscriptions();
        if snapshot.is_empty() {
            return;
        }
        tracing::info!(count = snapshot.len(), "re-establishing server subscriptions");
        for sub in snapshot {
            match self.invoke_subscribe(&sub.item, sub.params.clone(), None).await {
                Ok(value) => self.registry.consume(&sub.item, &sub.params, value),
                Err(e) => {
                    tracing::warn!(
                        item = %sub.item,
                        error = %e,
                        "resubscribe failed, detaching consumers"
                    );
                    for consumer in &sub.consumers {
                        if self.registry.unsubscribe(&sub.item, &sub.params, consumer) {
                            self.server_unsubscribe(&sub.item, &sub.params).await;
                        }
                    }
                }
            }
        }
    }
}

struct ClientPushHandler {
    shared: Arc<ClientShared>,
}

impl PushHandler for ClientPushHandler {
    fn on_data(&self, item: &str, params: &[Value], data: Value) {
        self.shared.registry.consume(item, params, data);
    }

    fn on_reconnected(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.resubscribe().await;
        });
    }
}

/// Consumers that subscribed but whose initial HTTP subscribe has not
/// resolved yet. An unsubscribe arriving in that window cancels the entry;
/// resolution then knows not to touch the registry and to compensate on
/// the server.
#[derive(Default)]
struct PendingSubscribes {
    inner: Mutex<HashMap<SubscriptionKey, Vec<PendingEntry>>>,
}

struct PendingEntry {
    consumer: Consumer,
    cancelled: bool,
}

impl PendingSubscribes {
    fn begin(&self, key: SubscriptionKey, consumer: &Consumer) {
        self.inner
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push(PendingEntry {
                consumer: consumer.clone(),
                cancelled: false,
            });
    }

    /// Mark the first live entry for this consumer as cancelled. Returns
    /// `false` if no such entry exists (the subscribe already resolved).
    fn cancel(&self, key: &SubscriptionKey, consumer: &Consumer) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(entries) = inner.get_mut(key) else {
            return false;
        };
        match entries
            .iter_mut()
            .find(|e| !e.cancelled && Arc::ptr_eq(&e.consumer, consumer))
        {
            Some(entry) => {
                entry.cancelled = true;
                true
            }
            None => false,
        }
    }

    /// Remove this consumer's entry at resolution time. Returns `true` if
    /// the subscribe is still wanted (not cancelled mid-flight).
    fn finish(&self, key: &SubscriptionKey, consumer: &Consumer) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(entries) = inner.get_mut(key) else {
            return true;
        };
        let wanted = match entries
            .iter()
            .position(|e| Arc::ptr_eq(&e.consumer, consumer))
        {
            Some(pos) => !entries.remove(pos).cancelled,
            None => true,
        };
        if entries.is_empty() {
            inner.remove(key);
        }
        wanted
    }

    /// Whether any not-yet-cancelled subscribe is still in flight for the key.
    fn has_live(&self, key: &SubscriptionKey) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|entries| entries.iter().any(|e| !e.cancelled))
    }
}

struct CallEndpoint<'a> {
    transport: &'a dyn CallTransport,
    timeout: Option<Duration>,
}

#[async_trait]
impl Invoke for CallEndpoint<'_> {
    async fn invoke(&self, ctx: &InvocationCtx, params: Vec<Value>) -> Result<Value, RpcError> {
        self.transport.call(&ctx.item, &params, self.timeout).await
    }
}

struct SubscribeEndpoint<'a> {
    transport: &'a dyn CallTransport,
    timeout: Option<Duration>,
}

#[async_trait]
impl Invoke for SubscribeEndpoint<'_> {
    async fn invoke(&self, ctx: &InvocationCtx, params: Vec<Value>) -> Result<Value, RpcError> {
        self.transport
            .subscribe(&ctx.item, &params, self.timeout)
            .await
    }
}

struct UnsubscribeEndpoint<'a> {
    transport: &'a dyn CallTransport,
}

#[async_trait]
impl Invoke for UnsubscribeEndpoint<'_> {
    async fn invoke(&self, ctx: &InvocationCtx, params: Vec<Value>) -> Result<Value, RpcError> {
        self.transport.unsubscribe(&ctx.item, &params).await?;
        Ok(Value::Null)
    }
}
