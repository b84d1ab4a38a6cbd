//! HTTP command channel backed by `reqwest`.
//!
//! All three operations POST the JSON parameter array to
//! `<base>/{call,subscribe,unsubscribe}/<item>` with the client id header
//! attached, so the server can key subscriptions and route pushes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use pushrpc_core::error::{ErrorEnvelope, RpcError};
use pushrpc_core::key::{ClientId, CLIENT_ID_HEADER};
use pushrpc_core::transport::CallTransport;

/// Configuration for [`HttpChannel`].
#[derive(Debug, Clone)]
pub struct HttpChannelConfig {
    /// Default per-call deadline, overridable per invocation.
    pub call_timeout: Duration,
}

impl Default for HttpChannelConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// The HTTP command channel. Stateless beyond its base URL, client id and
/// default deadline.
pub struct HttpChannel {
    base_url: String,
    client_id: ClientId,
    http: reqwest::Client,
    call_timeout: Duration,
}

impl HttpChannel {
    /// Create a channel for the given base URL (e.g. `http://host:8080/rpc`).
    pub fn new(
        base_url: impl Into<String>,
        client_id: ClientId,
        config: HttpChannelConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id,
            http,
            call_timeout: config.call_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn route_url(&self, operation: &str, item: &str) -> String {
        format!("{}/{}/{}", self.base_url, operation, item)
    }

    async fn post(
        &self,
        operation: &str,
        item: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let effective = timeout.unwrap_or(self.call_timeout);
        let url = self.route_url(operation, item);
        tracing::debug!(url = %url, timeout_ms = effective.as_millis() as u64, "dispatching request");

        let response = self
            .http
            .post(&url)
            .header(CLIENT_ID_HEADER, self.client_id.as_str())
            .timeout(effective)
            .json(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout {
                        ms: effective.as_millis() as u64,
                    }
                } else {
                    RpcError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(decode_error(status.as_u16(), &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }
}

/// Map a non-2xx response onto the error taxonomy: a well-formed
/// `{code, message, details?}` envelope keeps its identity, anything else
/// becomes a transport error.
fn decode_error(status: u16, body: &[u8]) -> RpcError {
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => RpcError::from_envelope(envelope),
        Err(_) => RpcError::Transport(format!("HTTP {status}")),
    }
}

#[async_trait]
impl CallTransport for HttpChannel {
    async fn call(
        &self,
        item: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        self.post("call", item, params, timeout).await
    }

    async fn subscribe(
        &self,
        item: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        self.post("subscribe", item, params, timeout).await
    }

    async fn unsubscribe(&self, item: &str, params: &[Value]) -> Result<(), RpcError> {
        self.post("unsubscribe", item, params, None).await?;
        Ok(())
    }
}
