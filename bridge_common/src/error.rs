//! Error types shared between the client, the simulator and the tooling.
//!
//! The `BridgeError` enum unifies the hard failures of the workspace: I/O,
//! serialization, configuration, address resolution, ZMTP protocol violations
//! and channel communication. Timeouts and malformed payloads are deliberately
//! absent: those are values (`None` and a synthetic envelope), not errors.
use std::io;
use std::string::FromUtf8Error;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type shared by client, simulator and tooling.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// I/O error originating from the standard library or sockets/files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A received frame is not valid UTF-8 text.
    #[error("Frame is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),

    /// Invalid configuration or request arguments.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint address that cannot be parsed as `host:port`.
    #[error("Invalid endpoint address: {0}")]
    Address(String),

    /// Host name that did not resolve to any socket address.
    #[error("Cannot resolve host: {0}")]
    Resolve(String),

    /// Failure to establish or accept a connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failure to write to an established endpoint stream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer violated the ZMTP framing or handshake rules.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request/acknowledge ordering was violated on a request channel.
    #[error("Socket state error: {0}")]
    State(String),

    /// Operation attempted on a closed endpoint or terminated context.
    #[error("Endpoint is closed")]
    Closed,

    /// Crossbeam/channel send failed (e.g., receiver dropped); contains a short context string.
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),
}

impl<T> From<PoisonError<T>> for BridgeError {
    fn from(err: PoisonError<T>) -> Self {
        BridgeError::MutexLock(err.to_string())
    }
}
