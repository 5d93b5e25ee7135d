use std::process::ExitStatus;
use std::time::Duration;

use crate::bridge::ProcessResult;

/// Errors from running an external handler process.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The handler could not be started (not found, not executable, ...).
    #[error("failed to spawn handler {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },

    /// The handler outlived its deadline and was killed.
    #[error("handler {program} timed out after {timeout:?} and was killed")]
    Timeout { program: String, timeout: Duration },

    /// The handler ran to completion but reported failure.
    #[error("handler {program} failed: {status}")]
    NonZeroExit {
        program: String,
        status: ExitStatus,
        result: Box<ProcessResult>,
    },

    /// An I/O error while talking to the handler.
    #[error("handler I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that reject or abandon a single message.
///
/// None of these stop a worker loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A message with no frames reached the worker.
    #[error("empty message: no frames to dispatch")]
    EmptyMessage,

    /// Manifest and buffer disagree, or the manifest is malformed.
    #[error(transparent)]
    Codec(#[from] zlmb_frame::FrameError),

    /// The external handler failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// An in-process handler failed to write its output.
    #[error("handler output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that terminate a worker loop.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Receiving from the queue failed.
    #[error("transport error: {0}")]
    Transport(#[from] zlmb_queue::QueueError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
