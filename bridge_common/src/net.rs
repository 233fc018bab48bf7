//! Shared networking constants and helpers used by client, simulator and tooling.
use std::time::Duration;

use strum_macros::Display;

/// Command port: request/acknowledge channel (client REQ -> bridge REP).
pub const COMMAND_PORT: u16 = 2201;
/// Result port: command responses pushed by the bridge.
pub const RESULT_PORT: u16 = 2202;
/// Quote port: live bar/tick updates pushed by the bridge.
pub const QUOTE_PORT: u16 = 2203;
/// Event port: trade lifecycle notifications pushed by the bridge.
pub const EVENT_PORT: u16 = 2204;

/// Default receive timeout on the command endpoint.
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default receive timeout on the result endpoint.
pub const RESULT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default receive timeout on the quote endpoint.
pub const QUOTE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default receive timeout on the event endpoint.
pub const EVENT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default host of the bridge process.
pub const DEFAULT_HOST: &str = "localhost";

/// One of the four logical channels to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Endpoint {
    /// Bidirectional request/acknowledge channel.
    #[strum(serialize = "command")]
    Command,
    /// Inbound command responses.
    #[strum(serialize = "result")]
    Result,
    /// Inbound live price/bar ticks.
    #[strum(serialize = "quote")]
    Quote,
    /// Inbound trade/order lifecycle notifications.
    #[strum(serialize = "event")]
    Event,
}

impl Endpoint {
    /// All endpoints in the order they are opened and closed.
    pub const ALL: [Endpoint; 4] = [
        Endpoint::Command,
        Endpoint::Result,
        Endpoint::Quote,
        Endpoint::Event,
    ];
}

/// Helper to format a host with a port like "host:port".
///
/// IPv6 literals are wrapped in brackets so the result stays parseable.
pub fn addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Transport URL of an endpoint, as printed in connection logs.
pub fn tcp_url(host: &str, port: u16) -> String {
    format!("tcp://{}", addr(host, port))
}
