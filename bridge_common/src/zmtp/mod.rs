//! Minimal ZeroMQ transport (ZMTP 3.0, NULL mechanism) spoken by the bridge.
//!
//! - `codec` — greeting, frame and command encoding plus the incremental `Decoder`.
//! - `connection` — a handshaken TCP session that sends and receives messages.
pub mod codec;
pub mod connection;

pub use codec::SocketType;
pub use connection::Connection;
