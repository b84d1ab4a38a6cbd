//! pushrpc-http — the HTTP command channel for PushRPC.
//!
//! # Features
//! - POST routes for call / subscribe / unsubscribe
//! - Client id header on every request
//! - Per-call deadline with in-flight cancellation
//! - Error envelope decoding into the core taxonomy

pub mod client;

pub use client::{HttpChannel, HttpChannelConfig};
