//! # luawire-protocol
//!
//! Wire protocol for talking to a Lua command host over a single byte stream.
//!
//! This crate provides:
//! - Incremental JSON framing for an unprefixed stream of objects
//! - Length-prefixed command encoding (`<len>:<id>:<code>`)
//! - Typed reply/event classification
//! - Framing error types and protocol constants

pub mod codec;
pub mod error;
pub mod framer;
pub mod message;

pub use codec::{Command, CommandDecoder};
pub use error::FramingError;
pub use framer::{Frame, JsonFramer};
pub use message::{Incoming, Reply, SubtitleTrack};

/// Default port the Lua host listens on.
pub const DEFAULT_PORT: u16 = 9998;

/// Default maximum size of a single incoming JSON frame (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;
