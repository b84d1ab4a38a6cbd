//! The channel abstractions the client core orchestrates.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcError;

/// The command transport: initiates calls, subscribes and unsubscribes.
///
/// `timeout` is the per-invocation deadline override; `None` means the
/// channel default applies.
///
/// # Object Safety
/// The trait is object-safe and is stored as `Arc<dyn CallTransport>`.
#[async_trait]
pub trait CallTransport: Send + Sync + 'static {
    /// Invoke the item and return the decoded result.
    async fn call(
        &self,
        item: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError>;

    /// Request the current value and register the subscription on the
    /// server side (the server keys it by client id).
    async fn subscribe(
        &self,
        item: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError>;

    /// Tell the server to drop its subscription for the key.
    async fn unsubscribe(&self, item: &str, params: &[Value]) -> Result<(), RpcError>;
}

/// The push delivery channel (a WebSocket, in practice).
pub trait PushTransport: Send + Sync + 'static {
    /// Initiate a connection if not already connected. Non-blocking and
    /// idempotent; failures are handled by the channel's reconnect loop
    /// and are never surfaced to subscribers.
    fn connect(&self);

    /// Release the socket. Terminal: the channel will not reconnect.
    fn close(&self);
}

/// Seam through which the push channel hands events back to the client.
pub trait PushHandler: Send + Sync + 'static {
    /// A pushed data frame arrived.
    fn on_data(&self, item: &str, params: &[Value], data: Value);

    /// The socket reopened after a disconnect (never fired for the first
    /// connect in the channel's lifetime). Triggers the resubscribe pass.
    fn on_reconnected(&self);
}
