/// Errors that can occur during manifest decoding and packet framing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The manifest total does not match the buffer length.
    #[error(
        "manifest mismatch: {frames} frame(s) declare {declared} byte(s), buffer holds {actual}"
    )]
    ManifestMismatch {
        frames: usize,
        declared: usize,
        actual: usize,
    },

    /// The manifest text is not a colon-joined list of non-negative integers.
    #[error("malformed manifest {input:?}: {reason}")]
    MalformedManifest { input: String, reason: String },

    /// A multipart payload ended before all declared parts were read.
    #[error("truncated message: expected {expected} byte(s), {available} available")]
    TruncatedMessage { expected: usize, available: usize },

    /// The packet header contains an invalid magic number.
    #[error("invalid packet magic (expected 0x5a4c \"ZL\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing packets.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for read/write timeouts, which leave a reader resumable.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut
        )
    }

    /// True for errors that describe bad message content rather than a broken link.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            FrameError::ManifestMismatch { .. }
                | FrameError::MalformedManifest { .. }
                | FrameError::TruncatedMessage { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
