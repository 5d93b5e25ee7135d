//! Packet kinds on a queue connection.
//!
//! `CONTROL` carries the JSON handshake. The remaining kinds implement the
//! credit-based delivery between the broker and its pull peers.

/// Handshake and connection management (JSON payload).
pub const CONTROL: u16 = 0;

/// A multipart message (see [`crate::encode_message`]).
pub const MESSAGE: u16 = 1;

/// Pull peer asks for exactly one message.
pub const READY: u16 = 2;

/// Pull peer withdraws an outstanding `READY`.
pub const CANCEL: u16 = 3;

/// Broker confirms a `CANCEL`; no message was dispatched for that credit.
pub const CANCELLED: u16 = 4;

/// Returns a human-readable name for a packet kind.
pub fn kind_name(kind: u16) -> &'static str {
    match kind {
        CONTROL => "CONTROL",
        MESSAGE => "MESSAGE",
        READY => "READY",
        CANCEL => "CANCEL",
        CANCELLED => "CANCELLED",
        _ => "UNKNOWN",
    }
}
