//! End-to-end connectivity checks against a running bridge.
//!
//! Runs five checks in order: account information, symbol subscription,
//! history download, bar stream and tick stream. Every check sends through
//! the regular client API, so a pass means all four endpoints work.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bridge_common::payload::{Tick, TickData};
use bridge_common::{Action, Payload, Request, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::client::BridgeClient;
use crate::transport::Transport;

/// Parameters of a smoke run.
#[derive(Debug, Clone)]
pub struct SmokeOptions {
    /// Symbol used for the configure, history and bar-stream checks.
    pub bar_symbol: String,
    /// Bar timeframe of those checks.
    pub bar_timeframe: String,
    /// Symbol used for the tick-stream check.
    pub tick_symbol: String,
    /// How long to listen for bar updates. M1 bars only close once a minute.
    pub bar_window: Duration,
    /// How long to listen for ticks.
    pub tick_window: Duration,
    /// Lookback of the history request.
    pub history_span: chrono::Duration,
}

impl Default for SmokeOptions {
    fn default() -> Self {
        Self {
            bar_symbol: String::from("XAUUSD"),
            bar_timeframe: String::from("M1"),
            tick_symbol: String::from("BTCUSD"),
            bar_window: Duration::from_secs(70),
            tick_window: Duration::from_secs(15),
            history_span: chrono::Duration::days(7),
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeCheck {
    /// Check name, e.g. `account`.
    pub name: &'static str,
    /// Whether the check passed.
    pub passed: bool,
    /// What was seen, or why it failed.
    pub detail: String,
}

impl SmokeCheck {
    fn pass(name: &'static str, detail: String) -> Self {
        info!("✓ {}: {}", name, detail);
        Self { name, passed: true, detail }
    }

    fn fail(name: &'static str, detail: String) -> Self {
        warn!("✗ {}: {}", name, detail);
        Self { name, passed: false, detail }
    }
}

/// Runs the checks and returns one entry per check.
pub struct SmokeSuite<'a, T: Transport> {
    client: &'a BridgeClient<T>,
    options: SmokeOptions,
    shutdown: Arc<AtomicBool>,
}

impl<'a, T: Transport> SmokeSuite<'a, T> {
    /// Suite running against `client`.
    pub fn new(client: &'a BridgeClient<T>, options: SmokeOptions) -> Self {
        Self {
            client,
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stream checks end early once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Runs every check in order; a failed check does not stop the others.
    pub fn run(&self) -> Result<Vec<SmokeCheck>> {
        Ok(vec![
            self.account()?,
            self.configure()?,
            self.history()?,
            self.bar_stream()?,
            self.tick_stream()?,
        ])
    }

    fn subscribe(&self, symbol: &str, timeframe: &str) -> Request {
        Request::from(Action::Config)
            .param("actionType", "CONFIG")
            .param("symbol", symbol)
            .param("chartTF", timeframe)
    }

    /// Sends `request` and judges its result envelope.
    fn command_check(&self, name: &'static str, request: &Request) -> Result<(SmokeCheck, Option<Payload>)> {
        if self.client.send_request(request)?.is_none() {
            return Ok((SmokeCheck::fail(name, String::from("no acknowledgment")), None));
        }
        let check = match self.client.receive_result(None)? {
            None => SmokeCheck::fail(name, String::from("no result (timeout)")),
            Some(payload) if payload.is_error() => SmokeCheck::fail(
                name,
                format!("error: {}", payload.description().unwrap_or("Unknown error")),
            ),
            Some(payload) => return Ok((SmokeCheck::pass(name, String::from("ok")), Some(payload))),
        };
        Ok((check, None))
    }

    fn account(&self) -> Result<SmokeCheck> {
        let (check, payload) = self.command_check("account information", &Request::from(Action::Account))?;
        Ok(match payload.as_ref().and_then(Payload::data) {
            Some(data) => SmokeCheck::pass(check.name, format!("{}", data)),
            None => check,
        })
    }

    fn configure(&self) -> Result<SmokeCheck> {
        let request = self.subscribe(&self.options.bar_symbol, &self.options.bar_timeframe);
        Ok(self.command_check("symbol configuration", &request)?.0)
    }

    fn history(&self) -> Result<SmokeCheck> {
        let now = Utc::now();
        let request = Request::from(Action::History)
            .param("actionType", "DATA")
            .param("symbol", self.options.bar_symbol.as_str())
            .param("chartTF", self.options.bar_timeframe.as_str())
            .param("fromDate", (now - self.options.history_span).timestamp())
            .param("toDate", now.timestamp());
        let (check, payload) = self.command_check("market data", &request)?;
        Ok(match payload.as_ref().and_then(Payload::data_len) {
            Some(bars) => SmokeCheck::pass(check.name, format!("received {} bars", bars)),
            None => check,
        })
    }

    /// Subscribes, discards the subscription result and counts quote pushes
    /// matching `accept` for `window`.
    fn stream_check(
        &self,
        name: &'static str,
        symbol: &str,
        timeframe: &str,
        window: Duration,
        accept: fn(&TickData) -> bool,
    ) -> Result<SmokeCheck> {
        if self.client.send_request(&self.subscribe(symbol, timeframe))?.is_none() {
            return Ok(SmokeCheck::fail(name, String::from("no acknowledgment")));
        }
        self.client.receive_result(None)?;

        let started = Instant::now();
        let mut count = 0usize;
        while started.elapsed() < window && !self.shutdown.load(Ordering::Relaxed) {
            let Some(payload) = self.client.receive_quote(None)? else {
                continue;
            };
            let Some(tick) = Tick::from_payload(&payload) else {
                continue;
            };
            match tick.data {
                Some(data) if accept(&data) => {
                    count += 1;
                    info!("  [{}] {}", count, describe(&tick.symbol, tick.timeframe.as_deref(), &data));
                }
                _ => info!(
                    "  {} {}: status={}",
                    tick.symbol,
                    tick.timeframe.as_deref().unwrap_or("N/A"),
                    tick.status.as_deref().unwrap_or("N/A")
                ),
            }
        }
        Ok(if count > 0 {
            SmokeCheck::pass(name, format!("received {} update(s)", count))
        } else {
            SmokeCheck::fail(name, String::from("no updates received"))
        })
    }

    fn bar_stream(&self) -> Result<SmokeCheck> {
        self.stream_check(
            "live price stream",
            &self.options.bar_symbol,
            &self.options.bar_timeframe,
            self.options.bar_window,
            |data| matches!(data, TickData::Bar { .. }),
        )
    }

    fn tick_stream(&self) -> Result<SmokeCheck> {
        self.stream_check(
            "tick stream",
            &self.options.tick_symbol,
            "TICK",
            self.options.tick_window,
            |data| matches!(data, TickData::Quote { .. }),
        )
    }
}

/// One-line rendering of a tick or bar.
pub fn describe(symbol: &str, timeframe: Option<&str>, data: &TickData) -> String {
    let timeframe = timeframe.unwrap_or("N/A");
    match *data {
        TickData::Bar { time, open, high, low, close, volume } => {
            let at = DateTime::<Utc>::from_timestamp(time, 0)
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| time.to_string());
            format!(
                "{} {} @ {}: O={} H={} L={} C={} V={}",
                symbol, timeframe, at, open, high, low, close, volume
            )
        }
        TickData::Quote { time_ms, bid, ask } => {
            let at = DateTime::<Utc>::from_timestamp_millis(time_ms)
                .map(|t| t.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| time_ms.to_string());
            format!(
                "{} {} @ {}: Bid={} Ask={} Spread={:.5}",
                symbol,
                timeframe,
                at,
                bid,
                ask,
                ask - bid
            )
        }
    }
}

/// `true` when every check passed.
pub fn all_passed(checks: &[SmokeCheck]) -> bool {
    checks.iter().all(|check| check.passed)
}
