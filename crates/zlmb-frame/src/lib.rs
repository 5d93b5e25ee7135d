//! Frame-length manifests and length-prefixed packet framing for zlmb.
//!
//! Two layers live here:
//! - [`codec`] turns an ordered list of frames into a [`Manifest`] plus one
//!   contiguous buffer, and back. This is the form a handler process sees.
//! - [`packet`], [`reader`] and [`writer`] frame whole messages on a queue
//!   connection. Every packet carries:
//!   - a 2-byte magic number ("ZL") for stream synchronization
//!   - a 4-byte little-endian payload length
//!   - a 2-byte little-endian packet kind
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod kind;
pub mod manifest;
pub mod message;
pub mod packet;
pub mod reader;
pub mod writer;

pub use codec::{decode, decode_str, encode};
pub use error::{FrameError, Result};
pub use kind::{kind_name, CANCEL, CANCELLED, CONTROL, MESSAGE, READY};
pub use manifest::{Manifest, SEPARATOR};
pub use message::{decode_message, encode_message, Message};
pub use packet::{
    decode_packet, encode_packet, Packet, PacketConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use reader::PacketReader;
pub use writer::PacketWriter;
