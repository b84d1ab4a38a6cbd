//! pushrpc-ws — the WebSocket push channel for PushRPC.
//!
//! # Features
//! - Connect-on-demand or eager connect
//! - Auto-reconnect with bounded exponential backoff
//! - Ping/pong liveness probing (native control frames, text fallback)
//! - Inbound data-frame dispatch into the client core

pub mod client;

pub use client::{PushChannel, PushChannelConfig};
