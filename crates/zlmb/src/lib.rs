//! Multipart work queue with external process handlers.
//!
//! A producer pushes multipart messages onto a queue; workers pull them one
//! at a time and hand each to a handler program. The handler receives the
//! frames as one concatenated buffer on stdin plus a frame-length manifest
//! in its environment.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoints and stream transports (TCP, Unix sockets)
//! - [`frame`]: manifest codec and packet framing
//! - [`queue`]: push/pull sockets and the broker
//! - [`worker`]: envelopes, the process bridge and the worker loop

/// Re-export transport types.
pub mod transport {
    pub use zlmb_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use zlmb_frame::*;
}

/// Re-export queue types.
pub mod queue {
    pub use zlmb_queue::*;
}

/// Re-export worker types.
pub mod worker {
    pub use zlmb_worker::*;
}
