use std::io;

use thiserror::Error;
use uuid::Uuid;

/// Failures produced while reading or writing a length-prefixed frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("frame of {len} bytes exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },
    /// The frame arrived intact but its payload could not be decoded.
    /// The stream is still positioned on a frame boundary.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("stream closed by peer")]
    Closed,
}

impl FrameError {
    /// True when the error leaves the stream usable for further frames.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Malformed(_) | FrameError::Encode(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown connection {0}")]
    UnknownConnection(Uuid),
}
