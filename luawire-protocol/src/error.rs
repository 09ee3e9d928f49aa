//! Framing error types.

use bytes::Bytes;
use thiserror::Error;

/// Errors raised while extracting frames from the incoming stream or
/// decoding outgoing commands.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The stream ended in the middle of an object. The buffered bytes are
    /// handed back and the framer is left empty.
    #[error("incomplete frame at end of stream ({} bytes buffered)", partial.len())]
    IncompleteFrame { partial: Bytes },

    /// A frame (or the unfinished frame being assembled) exceeds the
    /// configured limit. The buffer is left untouched.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unexpected byte {0:#04x} at start of frame")]
    UnexpectedByte(u8),

    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid command frame: {0}")]
    InvalidCommand(String),
}

impl FramingError {
    /// Returns whether the framer can be retried from its current state.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FramingError::FrameTooLarge { .. })
    }
}
