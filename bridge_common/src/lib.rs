//!
//! Common types and utilities shared by the bridge client and the bridge simulator.
//!
//! This crate aggregates:
//! - `error` — unified error type `BridgeError` used across the workspace.
//! - `result` — handy `Result<T, BridgeError>` alias.
//! - `net` — default ports, timeouts and the `Endpoint` enum.
//! - `config` — `BridgeConfig`, the one place the four ports are configured.
//! - `command` — request objects sent on the command endpoint.
//! - `payload` — inbound payloads, the error envelope and typed tick/event views.
//! - `zmtp` — the ZeroMQ wire protocol spoken by the bridge.
//! - `logging` — `env_logger` setup for binaries.
#![warn(missing_docs)]
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod net;
pub mod payload;
pub mod result;
pub mod zmtp;

pub use command::{Action, Request};
pub use config::{BridgeConfig, Ports, Timeouts};
pub use error::BridgeError;
pub use net::Endpoint;
pub use payload::Payload;
pub use result::Result;
