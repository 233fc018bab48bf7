//! Client for the MT5 JsonAPI bridge.
//!
//! The bridge exposes four ZeroMQ endpoints: a request/acknowledge command
//! endpoint and three push endpoints for results, quotes and trade events.
//! `BridgeClient` owns all four and applies the per-endpoint timeouts.
//!
//! - `client` — `BridgeClient`, the four-endpoint facade.
//! - `transport` — the `Transport`/`Channel` seam the client is written against.
//! - `zmtp` — ZMTP endpoints that connect in the background, implementing that seam.
//! - `health` — TCP reachability probe of the four ports.
//! - `capture` — saves real responses to disk as samples.
//! - `smoke` — end-to-end connectivity checks.
//!
//! ```no_run
//! use bridge_client::BridgeClient;
//! use bridge_common::BridgeConfig;
//! use serde_json::Map;
//!
//! # fn main() -> bridge_common::Result<()> {
//! let client = BridgeClient::connect(BridgeConfig::from_env()?)?;
//! if client.send_command("ACCOUNT", Map::new())?.is_some() {
//!     if let Some(result) = client.receive_result(None)? {
//!         println!("{:?}", result.data());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
pub mod capture;
pub mod client;
pub mod health;
pub mod smoke;
pub mod transport;
pub mod zmtp;

pub use client::{BridgeClient, Reply};
pub use transport::{Channel, Role, Transport};
pub use zmtp::{ZmtpChannel, ZmtpTransport};
