//! Endpoint parsing and stream transports for zlmb.
//!
//! Supported endpoints:
//! - `tcp://host:port`
//! - `ipc:///path/to.sock` (Unix domain sockets, Unix only)
//!
//! This is the lowest layer of zlmb. Everything else builds on top of the
//! [`TransportStream`] type provided here.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::{connect, EndpointListener};
pub use traits::TransportStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
