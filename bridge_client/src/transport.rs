//! Transport seam between `BridgeClient` and the wire.
//!
//! A `Transport` is the shared context all four endpoints are opened from; a
//! `Channel` is one endpoint. The client only ever talks to these traits, so
//! the ZMTP implementation can be swapped for an in-memory one in tests.
use std::time::Duration;

use bridge_common::Result;
use bridge_common::zmtp::SocketType;

/// How an endpoint participates in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Strictly alternating send/receive (the command endpoint).
    Request,
    /// Receive-only stream pushed by the bridge.
    Pull,
}

impl Role {
    /// ZeroMQ socket type implementing the role.
    pub fn socket_type(self) -> SocketType {
        match self {
            Role::Request => SocketType::Req,
            Role::Pull => SocketType::Pull,
        }
    }
}

/// One messaging endpoint.
pub trait Channel: Send {
    /// Sends one text frame.
    fn send(&mut self, frame: &str) -> Result<()>;

    /// Waits up to `timeout` for one text frame; `Ok(None)` when nothing arrived.
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Releases the endpoint. Calling it twice is harmless.
    fn close(&mut self);
}

/// Shared context the endpoints are opened from.
pub trait Transport: Send + Sync {
    /// Endpoint type produced by `open`.
    type Channel: Channel;

    /// Opens an endpoint towards `address` (`host:port`).
    ///
    /// Only the address syntax is checked before returning; the endpoint then
    /// connects on its own, so the remote side may not be listening yet.
    fn open(&self, role: Role, address: &str) -> Result<Self::Channel>;

    /// Releases the context. Channels opened from it stop working.
    fn terminate(&self);
}
