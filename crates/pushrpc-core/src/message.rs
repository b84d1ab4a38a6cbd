//! WebSocket wire format for pushed data.
//!
//! Each inbound frame is a tagged JSON array. The only message the client
//! consumes is `Data`: `[13, messageId, itemName, parameters, data]`.

use serde_json::Value;

/// Tag of a server→client data frame.
pub const DATA_MESSAGE_TAG: u64 = 13;

/// Application-level liveness probe for transports that cannot carry
/// native ping/pong control frames.
pub const TEXT_PING: &str = "PING";
pub const TEXT_PONG: &str = "PONG";

/// A pushed `(itemName, parameters, data)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct PushFrame {
    /// Server-assigned message id; opaque to the client.
    pub message_id: Value,
    pub item: String,
    pub params: Vec<Value>,
    pub data: Value,
}

impl PushFrame {
    /// Parse an inbound text frame. Returns `None` for frames that are not
    /// data messages (unknown tags, malformed arrays) — the caller decides
    /// whether that is worth logging.
    pub fn decode(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let parts = value.as_array()?;
        if parts.len() != 5 || parts[0].as_u64()? != DATA_MESSAGE_TAG {
            return None;
        }
        Some(Self {
            message_id: parts[1].clone(),
            item: parts[2].as_str()?.to_string(),
            params: parts[3].as_array()?.clone(),
            data: parts[4].clone(),
        })
    }

    /// Serialize for transmission. Used by servers and test fixtures.
    pub fn encode(&self) -> String {
        serde_json::json!([
            DATA_MESSAGE_TAG,
            self.message_id,
            self.item,
            self.params,
            self.data
        ])
        .to_string()
    }
}
