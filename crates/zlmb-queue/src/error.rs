use crate::handshake::Role;

/// Errors that can occur in queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] zlmb_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] zlmb_frame::FrameError),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The operation is not available for this socket's role.
    #[error("{operation} is not available on a {role} socket")]
    WrongRole { role: Role, operation: &'static str },

    /// The peer sent a packet that is not valid at this point.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, QueueError>;
