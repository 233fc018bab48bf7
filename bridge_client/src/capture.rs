//! Captures real bridge responses to disk as reference samples.
//!
//! Each command result is written pretty-printed to `<dir>/<snake_name>.json`;
//! streams are sampled for a fixed time and the first payloads written as a
//! JSON array.
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bridge_common::{Action, BridgeError, Endpoint, Payload, Request, Result};
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use crate::client::BridgeClient;
use crate::transport::Transport;

/// At most this many stream payloads are written per sample file.
pub const STREAM_SAMPLE_LIMIT: usize = 100;
/// Slice used while polling a stream so the shutdown flag is honoured.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// One line of the capture summary.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEntry {
    /// Capture name as given, before `snake_name`.
    pub name: String,
    /// File written, `None` when nothing was captured.
    pub path: Option<PathBuf>,
    /// Number of items for streams and array results.
    pub items: Option<usize>,
}

impl CaptureEntry {
    /// Whether a sample file was written.
    pub fn succeeded(&self) -> bool {
        self.path.is_some()
    }
}

/// File name for a capture: lower case with spaces turned into underscores.
pub fn snake_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// The command set captured by default, with history windows ending now.
pub fn default_plan() -> Vec<(String, Request)> {
    let now = Utc::now().timestamp();
    let history = |symbol: &str, timeframe: &str, span: i64| {
        Request::from(Action::History)
            .param("actionType", "DATA")
            .param("symbol", symbol)
            .param("chartTF", timeframe)
            .param("fromDate", now - span)
            .param("toDate", now)
    };
    vec![
        (String::from("INSTRUMENTS"), Request::from(Action::Instruments)),
        (String::from("ACCOUNT"), Request::from(Action::Account)),
        (
            String::from("CONFIG_M1"),
            Request::from(Action::Config)
                .param("actionType", "CONFIG")
                .param("symbol", "XAUUSD")
                .param("chartTF", "M1"),
        ),
        (String::from("HISTORY_BARS"), history("XAUUSD", "M1", 7 * 24 * 3600)),
        (String::from("HISTORY_TICKS"), history("BTCUSD", "TICK", 3600)),
        (String::from("POSITIONS"), Request::from(Action::Positions)),
        (String::from("ORDERS"), Request::from(Action::Orders)),
        (String::from("BALANCE"), Request::from(Action::Balance)),
    ]
}

/// Sends commands through a client and stores what comes back.
pub struct ResponseCapture<'a, T: Transport> {
    client: &'a BridgeClient<T>,
    dir: PathBuf,
    result_timeout: Option<Duration>,
    shutdown: Option<Arc<AtomicBool>>,
    entries: Vec<CaptureEntry>,
}

impl<'a, T: Transport> ResponseCapture<'a, T> {
    /// Creates the output directory if needed.
    pub fn new(client: &'a BridgeClient<T>, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            client,
            dir,
            result_timeout: None,
            shutdown: None,
            entries: Vec::new(),
        })
    }

    /// Waits this long for each command result instead of the client default.
    pub fn with_result_timeout(mut self, timeout: Duration) -> Self {
        self.result_timeout = Some(timeout);
        self
    }

    /// Stops stream sampling early once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Directory the samples go to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Summary of every capture so far.
    pub fn entries(&self) -> &[CaptureEntry] {
        &self.entries
    }

    fn stopped(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn write_json<S: Serialize>(&self, name: &str, value: &S) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.json", snake_name(name)));
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, value)?;
        Ok(path)
    }

    /// Sends `request`, waits for its result and writes it to disk.
    ///
    /// Returns `None` when either the acknowledgment or the result timed out.
    /// Error envelopes from the bridge are still written; they are samples too.
    pub fn capture_command(&mut self, name: &str, request: &Request) -> Result<Option<Payload>> {
        info!("Capturing {}: {}", name, request.to_frame()?);
        let Some(ack) = self.client.send_request(request)? else {
            warn!("✗ {}: no acknowledgment (timeout)", name);
            self.entries.push(CaptureEntry {
                name: name.to_string(),
                path: None,
                items: None,
            });
            return Ok(None);
        };
        info!("✓ {}: acknowledged with {}", name, ack);

        let result = self.client.receive_result(self.result_timeout)?;
        let path = match &result {
            Some(payload) if payload.is_decode_failure() => {
                warn!("✗ {}: {}", name, payload.description().unwrap_or_default());
                None
            }
            Some(payload) => {
                let path = self.write_json(name, payload)?;
                if payload.is_error() {
                    info!("  {} error: {}", name, payload.description().unwrap_or("N/A"));
                }
                info!("✓ Saved to {}", path.display());
                Some(path)
            }
            None => {
                warn!("✗ {}: no result (timeout)", name);
                None
            }
        };
        self.entries.push(CaptureEntry {
            name: name.to_string(),
            items: result.as_ref().and_then(Payload::data_len),
            path,
        });
        Ok(result)
    }

    /// Collects payloads from a push endpoint for `duration`.
    ///
    /// Malformed frames are skipped. The first `STREAM_SAMPLE_LIMIT` payloads
    /// are written to `<name>.json` when anything arrived.
    pub fn capture_stream(&mut self, name: &str, endpoint: Endpoint, duration: Duration) -> Result<Vec<Payload>> {
        let receive = |timeout| match endpoint {
            Endpoint::Quote => self.client.receive_quote(Some(timeout)),
            Endpoint::Event => self.client.receive_event(Some(timeout)),
            Endpoint::Result => self.client.receive_result(Some(timeout)),
            Endpoint::Command => Err(BridgeError::State(String::from(
                "the command endpoint cannot be sampled",
            ))),
        };

        info!("Capturing {} stream {} for {:?}", endpoint, name, duration);
        let started = Instant::now();
        let mut payloads = Vec::new();
        while !self.stopped() {
            let remaining = duration.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            match receive(remaining.min(POLL_SLICE))? {
                Some(payload) if payload.is_decode_failure() => {
                    warn!("✗ {}: skipped malformed frame", name);
                }
                Some(payload) => {
                    payloads.push(payload);
                    if payloads.len() % 10 == 0 {
                        info!("  Received {} messages...", payloads.len());
                    }
                }
                None => {}
            }
        }
        info!("✓ Captured {} messages from {}", payloads.len(), endpoint);

        let path = if payloads.is_empty() {
            None
        } else {
            let sample = &payloads[..payloads.len().min(STREAM_SAMPLE_LIMIT)];
            Some(self.write_json(name, &sample)?)
        };
        self.entries.push(CaptureEntry {
            name: name.to_string(),
            path,
            items: Some(payloads.len()),
        });
        Ok(payloads)
    }
}
