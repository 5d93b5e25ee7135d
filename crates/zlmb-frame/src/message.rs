use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// An ordered multipart message.
///
/// Frames are opaque and may be empty. Order is significant and is
/// preserved by every encoding in this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: Vec<Bytes>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a message from frames, in order.
    pub fn from_frames<I, B>(frames: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a frame.
    pub fn push(&mut self, frame: impl Into<Bytes>) {
        self.frames.push(frame.into());
    }

    /// Frames in order.
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// Consume the message and return its frames.
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total payload bytes across all frames.
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }
}

impl IntoIterator for Message {
    type Item = Bytes;
    type IntoIter = std::vec::IntoIter<Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

/// Serialize a message as a packet payload.
///
/// ```text
/// ┌────────────┬──────────────┬─────────┬──────────────┬─────────┬─────
/// │ Count (4B) │ Len 0 (4B)   │ Frame 0 │ Len 1 (4B)   │ Frame 1 │ ...
/// │ LE         │ LE           │         │ LE           │         │
/// └────────────┴──────────────┴─────────┴──────────────┴─────────┴─────
/// ```
pub fn encode_message(message: &Message, dst: &mut BytesMut) -> Result<()> {
    let count = u32::try_from(message.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: message.len(),
        max: u32::MAX as usize,
    })?;

    dst.reserve(4 + message.len() * 4 + message.byte_len());
    dst.put_u32_le(count);
    for frame in message.frames() {
        let len = u32::try_from(frame.len()).map_err(|_| FrameError::PayloadTooLarge {
            size: frame.len(),
            max: u32::MAX as usize,
        })?;
        dst.put_u32_le(len);
        dst.put_slice(frame);
    }
    Ok(())
}

/// Parse a packet payload produced by [`encode_message`].
///
/// Frames are zero-copy slices of `src`.
pub fn decode_message(mut src: Bytes) -> Result<Message> {
    let count = take_u32(&mut src)? as usize;

    // Each frame needs at least its 4-byte length prefix.
    if count > src.len() / 4 {
        return Err(FrameError::TruncatedMessage {
            expected: count.saturating_mul(4),
            available: src.len(),
        });
    }

    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let len = take_u32(&mut src)? as usize;
        if src.len() < len {
            return Err(FrameError::TruncatedMessage {
                expected: len,
                available: src.len(),
            });
        }
        frames.push(src.split_to(len));
    }

    if !src.is_empty() {
        return Err(FrameError::TruncatedMessage {
            expected: 0,
            available: src.len(),
        });
    }

    Ok(Message { frames })
}

fn take_u32(src: &mut Bytes) -> Result<u32> {
    if src.len() < 4 {
        return Err(FrameError::TruncatedMessage {
            expected: 4,
            available: src.len(),
        });
    }
    Ok(src.get_u32_le())
}
