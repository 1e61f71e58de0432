//! Unix-socket bridge across the privilege boundary
//!
//! The privileged poller runs a [`BridgeClient`] that keeps one connection to
//! the session-side [`BridgeServer`]. The server forwards every message to a
//! [`LayerSink`](crate::bus::LayerSink). Framing lives in [`wire`].

pub mod client;
pub mod server;
pub mod wire;

pub use client::{BridgeClient, BridgeSender};
pub use server::{lock_path, BridgeServer};

use std::path::PathBuf;

use thiserror::Error;

/// Errors on either side of the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Nobody is listening on the socket path
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Peer closed or the stream failed mid-session
    #[error("Connection lost")]
    ConnectionLost,

    /// Another live server owns the socket path
    #[error("Socket {} is already served by a running bridge", .0.display())]
    AddressInUse(PathBuf),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
