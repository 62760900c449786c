use serde::{Deserialize, Serialize};

use crate::UserId;

/// Events sent over the WebSocket gateway.
///
/// Serialized as `{ "type": ..., ...payload }` text frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// Server acknowledges a `connection` announcement
    #[serde(rename = "connection")]
    ConnectionAck,

    /// Human-readable notification text
    #[serde(rename = "message")]
    Notification { text: String },
}

impl GatewayEvent {
    pub fn notification(text: impl Into<String>) -> Self {
        Self::Notification { text: text.into() }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayCommand {
    /// Announce the identity this connection speaks for
    #[serde(rename = "connection")]
    Connection { id: UserId },

    /// Relay a message to every live connection
    #[serde(rename = "message")]
    Message { text: String },
}
