//! Bridge Client: operator tool for the MT5 JsonAPI bridge.
//!
//! Connects to the four bridge endpoints and runs one subcommand:
//! a port health check, a single command, the smoke checks, a live
//! quote/event watch, or a response capture.
//!
//! Usage example (CLI):
//! ```bash
//! bridge_client --host 192.168.0.10 health
//! bridge_client send HISTORY symbol=XAUUSD chartTF=M1 fromDate=1736000000 --wait-ms 10000
//! bridge_client watch quotes --symbol BTCUSD --timeframe TICK --seconds 30
//! ```
mod args;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bridge_client::capture::{self, ResponseCapture};
use bridge_client::health;
use bridge_client::smoke::{self, SmokeOptions, SmokeSuite};
use bridge_client::BridgeClient;
use bridge_common::logging::init_logger;
use bridge_common::payload::{Tick, TradeEvent};
use bridge_common::{Action, BridgeConfig, BridgeError, Endpoint, Request, Result};
use clap::Parser;
use log::{error, info};
use serde_json::Map;

use crate::args::{Args, Cmd, Stream, parse_param};

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.verbose);
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Flag flipped by Ctrl+C.
fn install_shutdown() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down client...");
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| BridgeError::Config(format!("cannot install Ctrl+C handler: {}", e)))?;
    Ok(shutdown)
}

/// Runs the selected subcommand; `Ok(false)` means it ran but failed.
fn run(args: Args) -> Result<bool> {
    let config = args.config()?;
    match args.command {
        Cmd::Health { timeout_ms } => {
            let report = health::probe(&config, Duration::from_millis(timeout_ms));
            println!("{}", report);
            Ok(report.is_healthy())
        }
        Cmd::Send { action, params, wait_ms } => {
            let params = params
                .iter()
                .map(|raw| parse_param(raw))
                .collect::<Result<Map<_, _>>>()?;
            send(config, &action, params, wait_ms.map(Duration::from_millis))
        }
        Cmd::Smoke {
            symbol,
            timeframe,
            tick_symbol,
            bar_secs,
            tick_secs,
        } => {
            let options = SmokeOptions {
                bar_symbol: symbol,
                bar_timeframe: timeframe,
                tick_symbol,
                bar_window: Duration::from_secs(bar_secs),
                tick_window: Duration::from_secs(tick_secs),
                ..SmokeOptions::default()
            };
            run_smoke(config, options)
        }
        Cmd::Watch {
            stream,
            symbol,
            timeframe,
            seconds,
        } => watch(config, stream, symbol, &timeframe, seconds.map(Duration::from_secs)),
        Cmd::Capture { out, stream_secs } => run_capture(config, out, Duration::from_secs(stream_secs)),
    }
}

fn send(
    config: BridgeConfig,
    action: &str,
    params: Map<String, serde_json::Value>,
    wait: Option<Duration>,
) -> Result<bool> {
    let client = BridgeClient::connect(config)?;
    let Some(reply) = client.request(action, params, wait)? else {
        println!("✗ No acknowledgment from command endpoint (timeout)");
        return Ok(false);
    };
    println!("← ACK: {}", reply.ack);
    match reply.result {
        Some(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(!payload.is_error())
        }
        None => {
            println!("✗ No result from result endpoint (timeout)");
            Ok(false)
        }
    }
}

fn run_smoke(config: BridgeConfig, options: SmokeOptions) -> Result<bool> {
    let shutdown = install_shutdown()?;
    let client = BridgeClient::connect(config)?;
    let checks = SmokeSuite::new(&client, options).with_shutdown(shutdown).run()?;

    println!("{}", "=".repeat(60));
    println!("TEST SUMMARY");
    println!("{}", "=".repeat(60));
    for check in &checks {
        let status = if check.passed { "✓ PASS" } else { "✗ FAIL" };
        println!("{} - {} ({})", status, check.name, check.detail);
    }
    let passed = checks.iter().filter(|check| check.passed).count();
    println!("\nTotal: {}/{} tests passed", passed, checks.len());
    Ok(smoke::all_passed(&checks))
}

fn watch(
    config: BridgeConfig,
    stream: Stream,
    symbol: Option<String>,
    timeframe: &str,
    limit: Option<Duration>,
) -> Result<bool> {
    let shutdown = install_shutdown()?;
    let client = BridgeClient::connect(config)?;

    if let (Stream::Quotes, Some(symbol)) = (stream, symbol.as_deref()) {
        let request = Request::from(Action::Config)
            .param("actionType", "CONFIG")
            .param("symbol", symbol)
            .param("chartTF", timeframe);
        if client.send_request(&request)?.is_none() {
            println!("✗ Subscription to {} {} was not acknowledged", symbol, timeframe);
            return Ok(false);
        }
        if let Some(result) = client.receive_result(None)? {
            if result.is_error() {
                println!("✗ Subscription failed: {}", result.description().unwrap_or("Unknown error"));
                return Ok(false);
            }
        }
        info!("Subscribed to {} {}", symbol, timeframe);
    }

    let started = Instant::now();
    let mut count = 0usize;
    info!("Watching {:?}. Press Ctrl+C to exit.", stream);
    while !shutdown.load(Ordering::SeqCst) && limit.is_none_or(|limit| started.elapsed() < limit) {
        let payload = match stream {
            Stream::Quotes => client.receive_quote(None)?,
            Stream::Events => client.receive_event(None)?,
        };
        let Some(payload) = payload else {
            continue;
        };
        count += 1;
        let line = match stream {
            Stream::Quotes => Tick::from_payload(&payload).and_then(|tick| {
                tick.data
                    .map(|data| smoke::describe(&tick.symbol, tick.timeframe.as_deref(), &data))
            }),
            Stream::Events => TradeEvent::from_payload(&payload).map(|event| {
                format!(
                    "{} ticket={} type={} volume={}",
                    event.event,
                    event.ticket.map(|t| t.to_string()).unwrap_or_default(),
                    event.kind.unwrap_or_default(),
                    event.volume.map(|v| v.to_string()).unwrap_or_default()
                )
            }),
        };
        println!("[{}] {}", count, line.unwrap_or_else(|| payload.as_value().to_string()));
    }
    println!("Received {} message(s)", count);
    Ok(count > 0)
}

fn run_capture(config: BridgeConfig, out: std::path::PathBuf, stream_window: Duration) -> Result<bool> {
    let shutdown = install_shutdown()?;
    let client = BridgeClient::connect(config)?;
    let mut capture = ResponseCapture::new(&client, out)?
        .with_result_timeout(Duration::from_secs(10))
        .with_shutdown(shutdown);

    for (name, request) in capture::default_plan() {
        capture.capture_command(&name, &request)?;
    }
    capture.capture_stream("LIVE_STREAM_M1", Endpoint::Quote, stream_window)?;
    let tick_config = Request::from(Action::Config)
        .param("actionType", "CONFIG")
        .param("symbol", "BTCUSD")
        .param("chartTF", "TICK");
    capture.capture_command("CONFIG_TICK", &tick_config)?;
    capture.capture_stream("LIVE_STREAM_TICK", Endpoint::Quote, stream_window)?;

    println!("{}", "=".repeat(60));
    println!("CAPTURE SUMMARY");
    println!("{}", "=".repeat(60));
    for entry in capture.entries() {
        let status = if entry.succeeded() { "✓ SUCCESS" } else { "✗ FAILED" };
        match entry.items {
            Some(items) => println!("{} - {} ({} items)", status, entry.name, items),
            None => println!("{} - {}", status, entry.name),
        }
    }
    println!("\nAll responses saved to: {}", capture.dir().display());
    Ok(capture.entries().iter().any(|entry| entry.succeeded()))
}
