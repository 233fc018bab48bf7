//! Connection settings for one bridge process.
//!
//! The four ports and their receive timeouts live here once instead of being
//! repeated by every tool. `BridgeConfig::from_env` overlays the `MT5_*`
//! environment variables on top of the defaults.
use std::collections::HashSet;
use std::time::Duration;

use crate::error::BridgeError;
use crate::net::{self, Endpoint};
use crate::result::Result;

/// Environment variable naming the bridge host.
pub const ENV_HOST: &str = "MT5_HOST";
/// Environment variable overriding the command port.
pub const ENV_COMMAND_PORT: &str = "MT5_SYSTEM_PORT";
/// Environment variable overriding the result port.
pub const ENV_RESULT_PORT: &str = "MT5_DATA_PORT";
/// Environment variable overriding the quote port.
pub const ENV_QUOTE_PORT: &str = "MT5_LIVE_PORT";
/// Environment variable overriding the event port.
pub const ENV_EVENT_PORT: &str = "MT5_STREAM_PORT";

/// Port numbers of the four endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    /// Request/acknowledge endpoint.
    pub command: u16,
    /// Pushed command results.
    pub result: u16,
    /// Pushed market data.
    pub quote: u16,
    /// Pushed trade events.
    pub event: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            command: net::COMMAND_PORT,
            result: net::RESULT_PORT,
            quote: net::QUOTE_PORT,
            event: net::EVENT_PORT,
        }
    }
}

impl Ports {
    /// Port assigned to `endpoint`.
    pub fn get(&self, endpoint: Endpoint) -> u16 {
        match endpoint {
            Endpoint::Command => self.command,
            Endpoint::Result => self.result,
            Endpoint::Quote => self.quote,
            Endpoint::Event => self.event,
        }
    }
}

/// Default receive timeouts of the four endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for a command acknowledgment.
    pub command: Duration,
    /// Wait for a result push.
    pub result: Duration,
    /// Wait for a market-data push.
    pub quote: Duration,
    /// Wait for a trade-event push.
    pub event: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: net::COMMAND_TIMEOUT,
            result: net::RESULT_TIMEOUT,
            quote: net::QUOTE_TIMEOUT,
            event: net::EVENT_TIMEOUT,
        }
    }
}

impl Timeouts {
    /// Default timeout of `endpoint`.
    pub fn get(&self, endpoint: Endpoint) -> Duration {
        match endpoint {
            Endpoint::Command => self.command,
            Endpoint::Result => self.result,
            Endpoint::Quote => self.quote,
            Endpoint::Event => self.event,
        }
    }
}

/// Everything needed to open a client against one bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Host name or IP address of the bridge.
    pub host: String,
    /// Ports of the four endpoints.
    pub ports: Ports,
    /// Default receive timeouts, overridable per call.
    pub timeouts: Timeouts,
    /// Promote connection and traffic traces from `debug` to `info`.
    pub verbose: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: String::from(net::DEFAULT_HOST),
            ports: Ports::default(),
            timeouts: Timeouts::default(),
            verbose: false,
        }
    }
}

impl BridgeConfig {
    /// Creates a configuration for `host` with the default ports and timeouts.
    pub fn new(host: &str) -> Self {
        Self {
            host: String::from(host),
            ..Self::default()
        }
    }

    /// Replaces the four ports.
    pub fn with_ports(mut self, ports: Ports) -> Self {
        self.ports = ports;
        self
    }

    /// Replaces the default timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the traffic logging level, see `verbose`.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Defaults overlaid with the `MT5_*` process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values returned by `lookup` for the `MT5_*` keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup(ENV_HOST) {
            config.host = host.trim().to_string();
        }
        let port = |key: &str, current: u16| -> Result<u16> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u16>()
                    .map_err(|e| BridgeError::Config(format!("{}={:?}: {}", key, raw, e))),
                None => Ok(current),
            }
        };
        config.ports = Ports {
            command: port(ENV_COMMAND_PORT, config.ports.command)?,
            result: port(ENV_RESULT_PORT, config.ports.result)?,
            quote: port(ENV_QUOTE_PORT, config.ports.quote)?,
            event: port(ENV_EVENT_PORT, config.ports.event)?,
        };
        Ok(config)
    }

    /// Checks the host is present and the four ports are distinct and non-zero.
    ///
    /// Host resolution is not attempted here; it happens when an endpoint
    /// first connects.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BridgeError::Config(String::from("host must not be empty")));
        }
        let mut seen = HashSet::new();
        for endpoint in Endpoint::ALL {
            let port = self.ports.get(endpoint);
            if port == 0 {
                return Err(BridgeError::Config(format!(
                    "{} port must be a positive integer",
                    endpoint
                )));
            }
            if !seen.insert(port) {
                return Err(BridgeError::Config(format!(
                    "{} port {} is already used by another endpoint",
                    endpoint, port
                )));
            }
        }
        Ok(())
    }

    /// `host:port` address of `endpoint`.
    pub fn address(&self, endpoint: Endpoint) -> String {
        net::addr(&self.host, self.ports.get(endpoint))
    }
}
