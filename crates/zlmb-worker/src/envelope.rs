use bytes::Bytes;
use zlmb_frame::{codec, Manifest, Message};

use crate::error::DispatchError;

/// Environment variable carrying the frame count.
pub const FRAME_VAR: &str = "FRAME";
/// Environment variable carrying the manifest, e.g. `5:0:3`.
pub const FRAME_LENGTH_VAR: &str = "FRAME_LENGTH";
/// Environment variable carrying the buffer length in bytes.
pub const LENGTH_VAR: &str = "LENGTH";

/// One message prepared for a handler: manifest plus concatenated buffer.
///
/// The manifest total always equals the buffer length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    manifest: Manifest,
    buffer: Bytes,
}

impl Envelope {
    /// Encode the frames of a received message.
    ///
    /// Fails with [`DispatchError::EmptyMessage`] when there are no frames.
    pub fn from_message(message: &Message) -> Result<Self, DispatchError> {
        Self::from_frames(message.frames())
    }

    /// Encode frames in order.
    pub fn from_frames<I, B>(frames: I) -> Result<Self, DispatchError>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let (manifest, buffer) = codec::encode(frames);
        if manifest.is_empty() {
            return Err(DispatchError::EmptyMessage);
        }
        Ok(Self { manifest, buffer })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    pub fn frame_count(&self) -> usize {
        self.manifest.frame_count()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Split the buffer back into frames.
    pub fn frames(&self) -> zlmb_frame::Result<Vec<Bytes>> {
        codec::decode(&self.manifest, &self.buffer)
    }

    /// The three handler variables, each name prefixed with `prefix`.
    pub fn env_vars(&self, prefix: &str) -> [(String, String); 3] {
        [
            (
                format!("{prefix}{FRAME_VAR}"),
                self.frame_count().to_string(),
            ),
            (
                format!("{prefix}{FRAME_LENGTH_VAR}"),
                self.manifest.to_string(),
            ),
            (
                format!("{prefix}{LENGTH_VAR}"),
                self.buffer_len().to_string(),
            ),
        ]
    }
}
