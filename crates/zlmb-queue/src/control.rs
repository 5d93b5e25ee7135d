use serde::{Deserialize, Serialize};

/// CONTROL message type: the server refused the handshake.
pub const CONTROL_REJECT: &str = "reject";
/// CONTROL message type: the sender is about to close the connection.
pub const CONTROL_BYE: &str = "bye";

/// CONTROL packet payload outside of the handshake exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ControlMessage {
    /// Create a handshake rejection carrying the reason.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            msg_type: CONTROL_REJECT.to_string(),
            reason: Some(reason.into()),
        }
    }

    /// Create a close notification.
    pub fn bye() -> Self {
        Self {
            msg_type: CONTROL_BYE.to_string(),
            reason: None,
        }
    }

    pub fn is_bye(&self) -> bool {
        self.msg_type == CONTROL_BYE
    }

    pub fn is_reject(&self) -> bool {
        self.msg_type == CONTROL_REJECT
    }
}
