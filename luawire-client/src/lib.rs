//! # luawire-client
//!
//! Client library for a Lua command host.
//!
//! This crate provides:
//! - One TCP connection carrying any number of concurrent commands
//! - Reply correlation by id, with cancellation when the connection dies
//! - A broadcast sink for unsolicited host events
//! - Connect with a single retry gated on an external readiness signal

pub mod client;
pub mod connection;
pub mod error;
pub mod pending;
pub mod reader;
pub mod ready;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::{ClientError, ErrorKind};
pub use pending::{PendingReply, PendingTable};
pub use reader::FrameReader;
pub use ready::{AnySignal, CommandSignal, DelaySignal, NoWait, ReadySignal};
