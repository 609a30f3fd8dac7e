//! JSON wire protocol for the relay.
//!
//! Every frame is a JSON object carried in a WebSocket text frame, with a
//! `type` field selecting the message:
//!
//! ```text
//! client → server   {"type":"join","code":"1234"}
//! client → server   {"type":"updateText","text":"hello"}
//! server → client   {"type":"error","message":"Invalid join code."}
//! server → client   {"type":"init","text":"hello"}
//! server → client   {"type":"updateText","text":"world"}
//! ```
//!
//! Unrecognized `type` values deserialize into [`ClientMessage::Unknown`]
//! rather than failing: the relay ignores them without dropping the
//! connection. Anything that is not a JSON object of the expected shape is a
//! decode error, which the relay also drops per-message.

use serde::{Deserialize, Serialize};

/// Rejection text sent with [`ServerMessage::Error`] on a failed join.
pub const INVALID_JOIN_CODE: &str = "Invalid join code.";

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Request to join the room with the shared secret.
    Join { code: String },
    /// Replace the shared text (honored only once joined).
    UpdateText { text: String },
    /// Any message with an unrecognized `type`. Always ignored.
    #[serde(other)]
    Unknown,
}

/// Messages the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Join rejected; the transport is closed right after this frame.
    Error { message: String },
    /// Sent once per accepted join with the current shared text.
    Init { text: String },
    /// A new shared-text value, fanned out to all other members.
    UpdateText { text: String },
}

impl ClientMessage {
    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the JSON wire form.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl ServerMessage {
    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the JSON wire form.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
