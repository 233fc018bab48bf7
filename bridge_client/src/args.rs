//! Command-line arguments for the bridge client.
//!
//! Connection flags fall back to the `MT5_*` environment and then to the
//! default ports. See `main` for what each subcommand does.
use std::path::PathBuf;

use bridge_common::{BridgeConfig, BridgeError, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Bridge host name or IP address (env MT5_HOST).
    #[clap(long)]
    pub host: Option<String>,

    /// Command (REQ/REP) port (env MT5_SYSTEM_PORT).
    #[clap(long)]
    pub command_port: Option<u16>,

    /// Result (PUSH/PULL) port (env MT5_DATA_PORT).
    #[clap(long)]
    pub result_port: Option<u16>,

    /// Quote (PUSH/PULL) port (env MT5_LIVE_PORT).
    #[clap(long)]
    pub quote_port: Option<u16>,

    /// Trade event (PUSH/PULL) port (env MT5_STREAM_PORT).
    #[clap(long)]
    pub event_port: Option<u16>,

    /// Log connection and traffic details.
    #[clap(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Cmd,
}

#[derive(Debug, Subcommand)]
pub enum Cmd {
    /// Check that all four bridge ports accept connections.
    Health {
        /// Per-port connect timeout.
        #[clap(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Send one command and print its acknowledgment and result.
    Send {
        /// Action name, e.g. ACCOUNT or HISTORY.
        action: String,
        /// Parameters as key=value; values are read as JSON when they parse.
        params: Vec<String>,
        /// Result timeout overriding the configured one.
        #[clap(long)]
        wait_ms: Option<u64>,
    },
    /// Run the connectivity checks and print a summary.
    Smoke {
        #[clap(long, default_value = "XAUUSD")]
        symbol: String,
        #[clap(long, default_value = "M1")]
        timeframe: String,
        #[clap(long, default_value = "BTCUSD")]
        tick_symbol: String,
        /// Seconds to listen for bar updates.
        #[clap(long, default_value_t = 70)]
        bar_secs: u64,
        /// Seconds to listen for ticks.
        #[clap(long, default_value_t = 15)]
        tick_secs: u64,
    },
    /// Print pushed quotes or trade events.
    Watch {
        #[clap(value_enum)]
        stream: Stream,
        /// Subscribe this symbol first (quotes only).
        #[clap(long)]
        symbol: Option<String>,
        #[clap(long, default_value = "TICK")]
        timeframe: String,
        /// Stop after this many seconds instead of waiting for Ctrl+C.
        #[clap(long)]
        seconds: Option<u64>,
    },
    /// Save real responses as JSON samples.
    Capture {
        #[clap(long, default_value = "data/response_samples")]
        out: PathBuf,
        /// Seconds to sample each stream.
        #[clap(long, default_value_t = 15)]
        stream_secs: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stream {
    Quotes,
    Events,
}

impl Args {
    /// Environment configuration with the command-line flags applied on top.
    pub fn config(&self) -> Result<BridgeConfig> {
        let mut config = BridgeConfig::from_env()?;
        if let Some(host) = &self.host {
            config.host = host.trim().replace('"', "");
        }
        if let Some(port) = self.command_port {
            config.ports.command = port;
        }
        if let Some(port) = self.result_port {
            config.ports.result = port;
        }
        if let Some(port) = self.quote_port {
            config.ports.quote = port;
        }
        if let Some(port) = self.event_port {
            config.ports.event = port;
        }
        config.validate()?;
        Ok(config.with_verbose(self.verbose))
    }
}

/// Parses one `key=value` parameter.
///
/// The value is taken as JSON when it parses (`volume=0.1`, `ids=[1,2]`) and
/// as a plain string otherwise (`symbol=EURUSD`).
pub fn parse_param(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| BridgeError::Config(format!("parameter {:?} is not key=value", raw)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(BridgeError::Config(format!("parameter {:?} has an empty key", raw)));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
