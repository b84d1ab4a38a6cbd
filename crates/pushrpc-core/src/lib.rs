//! pushrpc-core — subscription bookkeeping and client orchestration for PushRPC.
//!
//! # Overview
//!
//! PushRPC is a hybrid RPC runtime: commands (call / subscribe /
//! unsubscribe) travel over HTTP carrying a stable client id, while pushed
//! data arrives on a WebSocket. The core crate defines:
//!
//! - [`RpcClient`] — orchestrates the registry and both channels
//! - [`SubscriptionRegistry`] — per-key consumer sets + last-value cache
//! - [`CallTransport`] / [`PushTransport`] — the channel seams
//! - [`Middleware`] — the invocation wrapper chain
//! - [`RpcError`] / [`ErrorEnvelope`] — error taxonomy and wire envelope
//! - [`PushFrame`] — the pushed-data wire format
//! - [`CacheAdapter`] — optional stale-while-revalidate source

pub mod cache;
pub mod client;
pub mod error;
pub mod key;
pub mod message;
pub mod middleware;
pub mod registry;
pub mod transport;

pub use cache::{CacheAdapter, MemoryCache};
pub use client::{CallOptions, RpcClient, RpcClientConfig};
pub use error::{ErrorEnvelope, RpcError};
pub use key::{ClientId, SubscriptionKey, CLIENT_ID_HEADER};
pub use message::PushFrame;
pub use middleware::{with_middlewares, InvocationCtx, InvocationType, Invoke, Middleware, Next};
pub use registry::{Consumer, SubscriptionRegistry, SubscriptionSnapshot};
pub use transport::{CallTransport, PushHandler, PushTransport};
