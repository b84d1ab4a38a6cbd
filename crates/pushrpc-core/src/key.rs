//! Client identity and subscription keys.

use serde_json::Value;

/// Header carrying the client id on every HTTP request and on the
/// WebSocket handshake, so the server can correlate the two channels.
pub const CLIENT_ID_HEADER: &str = "x-rpc-client-id";

/// Opaque stable identifier assigned once at client construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscription is keyed by `(itemName, parameters)`.
///
/// Parameter equality uses the canonical serde_json serialization of the
/// parameter array; both sides of the protocol serialize with
/// insertion-order object keys, so equal inputs produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    item: String,
    params: String,
}

impl SubscriptionKey {
    pub fn new(item: &str, params: &[Value]) -> Self {
        Self {
            item: item.to_string(),
            params: serde_json::to_string(params).unwrap_or_default(),
        }
    }

    pub fn item(&self) -> &str {
        &self.item
    }

    /// The canonical serialization of the parameter array.
    pub fn canonical_params(&self) -> &str {
        &self.params
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.item, self.params)
    }
}
