//! Outgoing command encoding.
//!
//! A command travels as `<len>:<id>:<code>` where `<len>` is the UTF-8 byte
//! length of `<id>:<code>`. There is no trailing delimiter.

use crate::error::FramingError;
use bytes::{Buf, Bytes, BytesMut};

/// Longest length prefix accepted by [`CommandDecoder`].
const MAX_LENGTH_DIGITS: usize = 20;

/// A single command addressed to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Correlation id, echoed back as `reply_id`.
    pub id: u64,
    /// Lua source to run.
    pub code: String,
}

impl Command {
    pub fn new(id: u64, code: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
        }
    }

    /// Encodes the command into its wire form.
    pub fn encode(&self) -> Bytes {
        let inner = format!("{}:{}", self.id, self.code);
        Bytes::from(format!("{}:{}", inner.len(), inner))
    }
}

/// Decodes length-prefixed commands. The host side of the protocol; used to
/// script hosts in tests and tooling.
pub struct CommandDecoder {
    buffer: BytesMut,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next command from the buffer.
    pub fn decode_command(&mut self) -> Result<Option<Command>, FramingError> {
        let Some(colon) = self.buffer.iter().position(|&b| b == b':') else {
            if self.buffer.len() > MAX_LENGTH_DIGITS {
                return Err(FramingError::InvalidCommand(
                    "length prefix too long".to_string(),
                ));
            }
            return Ok(None);
        };

        let len: usize = std::str::from_utf8(&self.buffer[..colon])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| FramingError::InvalidCommand("bad length prefix".to_string()))?;

        let total = colon + 1 + len;
        if self.buffer.len() < total {
            return Ok(None);
        }

        self.buffer.advance(colon + 1);
        let inner = self.buffer.split_to(len);
        let inner = std::str::from_utf8(&inner)
            .map_err(|_| FramingError::InvalidCommand("invalid UTF-8".to_string()))?;

        let (id, code) = inner
            .split_once(':')
            .ok_or_else(|| FramingError::InvalidCommand("missing id separator".to_string()))?;
        let id = id
            .parse()
            .map_err(|_| FramingError::InvalidCommand(format!("bad id {:?}", id)))?;

        Ok(Some(Command::new(id, code)))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for CommandDecoder {
    fn default() -> Self {
        Self::new()
    }
}
