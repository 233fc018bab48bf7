//! Bridge Simulator: stand-in for the MT5 JsonAPI bridge.
//!
//! Listens on the four bridge ports and answers commands with canned results,
//! streams random-walk quotes for subscribed symbols and emits trade events.
//! Useful for trying the client without a trading terminal.
//!
//! Usage example (CLI):
//! ```bash
//! bridge_sim --host 0.0.0.0 --tick-interval-ms 250
//! ```
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bridge_common::logging::init_logger;
use bridge_common::{BridgeError, Ports, Result};
use bridge_sim::{SimBridge, SimConfig};
use clap::Parser;
use log::{error, info};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind the endpoints on.
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    #[clap(long, default_value_t = bridge_common::net::COMMAND_PORT)]
    command_port: u16,

    #[clap(long, default_value_t = bridge_common::net::RESULT_PORT)]
    result_port: u16,

    #[clap(long, default_value_t = bridge_common::net::QUOTE_PORT)]
    quote_port: u16,

    #[clap(long, default_value_t = bridge_common::net::EVENT_PORT)]
    event_port: u16,

    /// Milliseconds between generated quotes.
    #[clap(long, default_value_t = 500)]
    tick_interval_ms: u64,

    /// Log every connection and request.
    #[clap(short, long)]
    verbose: bool,
}

fn run(args: Args) -> Result<()> {
    let config = SimConfig {
        host: args.host.trim().to_string(),
        ports: Ports {
            command: args.command_port,
            result: args.result_port,
            quote: args.quote_port,
            event: args.event_port,
        },
        tick_interval: Duration::from_millis(args.tick_interval_ms.max(1)),
    };
    let sim = SimBridge::start(config)?;

    let shutdown = sim.shutdown_flag();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down simulator...");
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| BridgeError::Config(format!("cannot install Ctrl+C handler: {}", e)))?;

    info!("Simulator is running. Press Ctrl+C to exit.");
    sim.wait();
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.verbose);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
