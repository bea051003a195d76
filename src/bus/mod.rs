// src/bus/mod.rs

//! Messaging bus client.
//!
//! - [`message`]: typed messages and the builder that validates them.
//! - [`transport`]: the `BusConnection` trait and the Unix-socket
//!   implementation speaking newline-delimited JSON frames.
//! - [`bridge`]: the session the reactor drives (identify, Done, notices,
//!   abandoning messages nobody consumed).

use thiserror::Error;

pub mod bridge;
pub mod message;
pub mod transport;

pub use bridge::{BridgeEvent, MessagingSession, OP_DONE, OP_ICON_CACHE_UPDATE, OP_IDENTIFY};
pub use message::{
    Address, Arg, Message, MessageBuilder, MessageClass, MessageId, MessageState, Scope,
    StatusCode,
};
pub use transport::{BusConnection, Frame, SocketConnection};

/// Failure talking to the bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusStatus {
    #[error("could not connect to the messaging bus: {0}")]
    NotConnected(String),

    #[error("messaging bus connection lost: {0}")]
    Lost(String),

    #[error("message send failed: {0}")]
    SendFailed(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session already detached")]
    Detached,
}
