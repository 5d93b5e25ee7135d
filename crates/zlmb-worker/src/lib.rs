//! Worker side of zlmb.
//!
//! A [`WorkerLoop`] pulls messages from an [`EnvelopeTransport`], turns each
//! one into an [`Envelope`] (frame-length manifest plus concatenated buffer)
//! and hands it to a [`Handler`]. [`ProcessHandler`] runs an external
//! program through the [`ExternalProcessBridge`]:
//!
//! - `FRAME`: number of frames
//! - `FRAME_LENGTH`: the manifest, e.g. `5:0:3`
//! - `LENGTH`: total buffer length in bytes
//! - stdin: the buffer itself, then end-of-file
//!
//! [`EnvelopeTransport`]: zlmb_queue::EnvelopeTransport

pub mod bridge;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod worker;

pub use bridge::{BridgeConfig, ExternalProcessBridge, HandlerCommand, ProcessResult};
pub use envelope::{Envelope, FRAME_LENGTH_VAR, FRAME_VAR, LENGTH_VAR};
pub use error::{BridgeError, DispatchError, Result, WorkerError};
pub use handler::{Handler, InspectHandler, ProcessHandler};
pub use worker::{WorkerConfig, WorkerLoop, WorkerState, WorkerStats};
