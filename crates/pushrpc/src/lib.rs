//! pushrpc — hybrid HTTP/WebSocket push-RPC client runtime.
//!
//! Commands (call / subscribe / unsubscribe) travel over HTTP carrying a
//! stable client id; pushed data arrives on an auto-reconnecting
//! WebSocket. [`connect`] assembles the two channels around the client
//! core; the member crates are re-exported for embedders that want to
//! wire their own transports.

use std::sync::Arc;
use std::time::Duration;

pub use pushrpc_core::{
    CacheAdapter, CallOptions, CallTransport, ClientId, Consumer, ErrorEnvelope, InvocationCtx,
    InvocationType, MemoryCache, Middleware, Next, PushFrame, PushHandler, PushTransport,
    RpcClient, RpcClientConfig, RpcError, SubscriptionKey, SubscriptionRegistry, CLIENT_ID_HEADER,
};
pub use pushrpc_http::{HttpChannel, HttpChannelConfig};
pub use pushrpc_ws::{PushChannel, PushChannelConfig};

/// The full consumer-facing option set for [`connect`].
pub struct ConnectOptions {
    /// Stable client identity; generated when not set.
    pub client_id: Option<ClientId>,
    /// Push endpoint; derived from the base URL (`http` → `ws`, plus
    /// `/ws`) when not set.
    pub ws_url: Option<String>,
    /// Default per-call deadline.
    pub call_timeout: Duration,
    /// Initial reconnect backoff.
    pub reconnect_delay: Duration,
    /// Reconnect backoff ceiling.
    pub reconnect_delay_max: Duration,
    /// Liveness probe period.
    pub ping_interval: Duration,
    /// Whether push delivery is enabled; when `false`, subscribes degrade
    /// to one-shot calls.
    pub pushes: bool,
    /// Open the socket eagerly instead of on the first subscribe.
    pub connect_on_create: bool,
    /// Optional stale-while-revalidate cache adapter.
    pub cache: Option<Arc<dyn CacheAdapter>>,
    /// Chain applied to every invocation, outermost first.
    pub middleware: Vec<Arc<dyn Middleware>>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            ws_url: None,
            call_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            pushes: true,
            connect_on_create: false,
            cache: None,
            middleware: Vec::new(),
        }
    }
}

/// Assemble a client for the given base URL (e.g. `http://host:8080/rpc`).
///
/// Must be called from within a tokio runtime: the push channel runs as a
/// background task.
pub fn connect(base_url: &str, options: ConnectOptions) -> RpcClient {
    let client_id = options.client_id.unwrap_or_else(ClientId::generate);
    let http = Arc::new(HttpChannel::new(
        base_url,
        client_id.clone(),
        HttpChannelConfig {
            call_timeout: options.call_timeout,
        },
    ));
    let mut client = RpcClient::new(
        http,
        RpcClientConfig {
            client_id: client_id.clone(),
            call_timeout: options.call_timeout,
            pushes: options.pushes,
            cache: options.cache,
            middleware: options.middleware,
        },
    );

    if options.pushes {
        let ws_url = options
            .ws_url
            .unwrap_or_else(|| derive_ws_url(base_url));
        tracing::debug!(client_id = %client_id, ws_url = %ws_url, "wiring push channel");
        let push = PushChannel::spawn(
            ws_url,
            client_id,
            PushChannelConfig {
                reconnect_delay: options.reconnect_delay,
                reconnect_delay_max: options.reconnect_delay_max,
                ping_interval: options.ping_interval,
                connect_on_create: options.connect_on_create,
            },
            client.push_handler(),
        );
        client.set_push(Arc::new(push));
    }

    client
}

/// Push endpoint for a command base URL: swap the scheme and append `/ws`.
fn derive_ws_url(base_url: &str) -> String {
    let swapped = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{}/ws", swapped.trim_end_matches('/'))
}
