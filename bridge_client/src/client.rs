//! `BridgeClient`: the four-endpoint facade over the MT5 JsonAPI bridge.
//!
//! Commands go out on the request endpoint and are answered by a short
//! acknowledgment; the actual result arrives later on the result endpoint.
//! Market data and trade events are pushed on their own endpoints. Each
//! endpoint sits behind its own lock, so a thread polling quotes never waits
//! on a command round-trip.
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bridge_common::{BridgeConfig, BridgeError, Endpoint, Payload, Request, Result};
use log::{Level, debug, log, warn};
use serde_json::{Map, Value};

use crate::transport::{Channel, Role, Transport};
use crate::zmtp::ZmtpTransport;

/// Result payloads up to this size are logged in full in verbose mode.
const LOG_FULL_LIMIT: usize = 10_000;
/// How much of a malformed frame is shown on each side when logging it.
const LOG_EXCERPT: usize = 500;

/// Acknowledgment plus the result that followed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Raw acknowledgment text from the command endpoint.
    pub ack: String,
    /// `None` when no result arrived within the timeout.
    pub result: Option<Payload>,
}

/// Client for the four bridge endpoints.
pub struct BridgeClient<T: Transport = ZmtpTransport> {
    config: BridgeConfig,
    transport: T,
    command: Mutex<Option<T::Channel>>,
    result: Mutex<Option<T::Channel>>,
    quote: Mutex<Option<T::Channel>>,
    event: Mutex<Option<T::Channel>>,
    closed: AtomicBool,
    /// Level for traffic logging: `Info` when verbose, `Debug` otherwise.
    level: Level,
}

impl BridgeClient<ZmtpTransport> {
    /// Connects all four endpoints over ZMTP.
    ///
    /// Every endpoint starts connecting in the background right away and keeps
    /// retrying, so this succeeds even when the bridge is not running yet;
    /// commands then time out until it is.
    pub fn connect(config: BridgeConfig) -> Result<Self> {
        Self::with_transport(config, ZmtpTransport::new())
    }
}

impl<T: Transport> BridgeClient<T> {
    /// Builds a client on an arbitrary transport.
    ///
    /// If any endpoint fails to open, the ones already opened are closed and
    /// the transport is terminated before the error is returned.
    pub fn with_transport(config: BridgeConfig, transport: T) -> Result<Self> {
        if let Err(e) = config.validate() {
            transport.terminate();
            return Err(e);
        }
        let level = if config.verbose { Level::Info } else { Level::Debug };

        let mut opened: Vec<T::Channel> = Vec::with_capacity(Endpoint::ALL.len());
        for endpoint in Endpoint::ALL {
            let role = match endpoint {
                Endpoint::Command => Role::Request,
                _ => Role::Pull,
            };
            let address = config.address(endpoint);
            match transport.open(role, &address) {
                Ok(channel) => {
                    log!(level, "✓ Connected to {} endpoint: tcp://{}", endpoint, address);
                    opened.push(channel);
                }
                Err(e) => {
                    warn!("Failed to open {} endpoint tcp://{}: {}", endpoint, address, e);
                    for mut channel in opened {
                        channel.close();
                    }
                    transport.terminate();
                    return Err(e);
                }
            }
        }

        let mut slots = opened.into_iter().map(|channel| Mutex::new(Some(channel)));
        let command = slots.next().unwrap_or_default();
        let result = slots.next().unwrap_or_default();
        let quote = slots.next().unwrap_or_default();
        let event = slots.next().unwrap_or_default();
        Ok(BridgeClient {
            config,
            transport,
            command,
            result,
            quote,
            event,
            closed: AtomicBool::new(false),
            level,
        })
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// `host:port` the given endpoint talks to.
    pub fn endpoint_address(&self, endpoint: Endpoint) -> String {
        self.config.address(endpoint)
    }

    fn note(&self, args: fmt::Arguments<'_>) {
        log!(self.level, "{}", args);
    }

    fn slot(&self, endpoint: Endpoint) -> &Mutex<Option<T::Channel>> {
        match endpoint {
            Endpoint::Command => &self.command,
            Endpoint::Result => &self.result,
            Endpoint::Quote => &self.quote,
            Endpoint::Event => &self.event,
        }
    }

    fn lock(&self, endpoint: Endpoint) -> Result<MutexGuard<'_, Option<T::Channel>>> {
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }
        Ok(self.slot(endpoint).lock()?)
    }

    /// Sends `{"action": action, ..params}` and waits for the acknowledgment.
    ///
    /// Returns the raw acknowledgment text, or `None` when none arrived within
    /// the command timeout. An `action` key inside `params` is ignored.
    pub fn send_command(&self, action: &str, params: Map<String, Value>) -> Result<Option<String>> {
        let request = Request::with_params(action, params)?;
        self.send_request(&request)
    }

    /// Sends a prepared request and waits for the acknowledgment.
    pub fn send_request(&self, request: &Request) -> Result<Option<String>> {
        let frame = request.to_frame()?;
        let mut guard = self.lock(Endpoint::Command)?;
        let channel = guard.as_mut().ok_or(BridgeError::Closed)?;

        self.note(format_args!("→ Sending: {}", frame));
        channel.send(&frame)?;
        let ack = match channel.recv(self.config.timeouts.command) {
            Err(BridgeError::Utf8(e)) => {
                return Err(BridgeError::Protocol(format!(
                    "acknowledgment is not valid UTF-8: {}",
                    e
                )));
            }
            other => other?,
        };
        match ack {
            Some(ack) => {
                self.note(format_args!("← Command ACK: {}", ack));
                Ok(Some(ack))
            }
            None => {
                self.note(format_args!("✗ No response from command endpoint (timeout)"));
                Ok(None)
            }
        }
    }

    /// Waits for the next frame on the result endpoint.
    ///
    /// `timeout` overrides the configured result timeout for this call only.
    pub fn receive_result(&self, timeout: Option<Duration>) -> Result<Option<Payload>> {
        self.receive(Endpoint::Result, timeout)
    }

    /// Waits for the next market-data push.
    pub fn receive_quote(&self, timeout: Option<Duration>) -> Result<Option<Payload>> {
        self.receive(Endpoint::Quote, timeout)
    }

    /// Waits for the next trade-event push.
    pub fn receive_event(&self, timeout: Option<Duration>) -> Result<Option<Payload>> {
        self.receive(Endpoint::Event, timeout)
    }

    fn receive(&self, endpoint: Endpoint, timeout: Option<Duration>) -> Result<Option<Payload>> {
        if endpoint == Endpoint::Command {
            return Err(BridgeError::State(String::from(
                "the command endpoint only yields acknowledgments",
            )));
        }
        let timeout = timeout.unwrap_or_else(|| self.config.timeouts.get(endpoint));
        let mut guard = self.lock(endpoint)?;
        let channel = guard.as_mut().ok_or(BridgeError::Closed)?;

        let received = match channel.recv(timeout) {
            Err(BridgeError::Utf8(e)) => {
                warn!("✗ Frame on {} endpoint is not valid UTF-8: {}", endpoint, e);
                let shown = String::from_utf8_lossy(e.as_bytes());
                self.note(format_args!("  Message: {}", shown));
                return Ok(Some(Payload::decode_failure(&e.to_string())));
            }
            other => other?,
        };
        let Some(text) = received else {
            if endpoint == Endpoint::Result && !timeout.is_zero() {
                self.note(format_args!("✗ No response from result endpoint (timeout)"));
            }
            return Ok(None);
        };
        let payload = match serde_json::from_str::<Value>(&text) {
            Ok(value) => Payload::from(value),
            Err(e) => {
                self.log_malformed(endpoint, &text, &e);
                return Ok(Some(Payload::decode_failure(&e.to_string())));
            }
        };
        if endpoint == Endpoint::Result {
            self.log_result(&text, &payload);
        } else {
            debug!("← {}: {}", endpoint, text);
        }
        Ok(Some(payload))
    }

    fn log_malformed(&self, endpoint: Endpoint, text: &str, error: &serde_json::Error) {
        warn!("✗ Malformed JSON on {} endpoint: {}", endpoint, error);
        let chars = text.chars().count();
        self.note(format_args!("  Message length: {} chars", chars));
        if chars > LOG_EXCERPT * 2 {
            let head: String = text.chars().take(LOG_EXCERPT).collect();
            let tail: String = text.chars().skip(chars - LOG_EXCERPT).collect();
            self.note(format_args!("  First {} chars: {}", LOG_EXCERPT, head));
            self.note(format_args!("  Last {} chars: {}", LOG_EXCERPT, tail));
        } else {
            self.note(format_args!("  Message: {}", text));
        }
    }

    fn log_result(&self, text: &str, payload: &Payload) {
        if text.len() < LOG_FULL_LIMIT {
            self.note(format_args!("← Result: {}", text));
        } else {
            self.note(format_args!("← Result: {} bytes", text.len()));
        }
        if let Some(items) = payload.data_len() {
            self.note(format_args!("  Data items: {}", items));
        }
    }

    /// Sends a command, then waits for its result.
    ///
    /// Returns `None` when the command was not acknowledged; `result` is
    /// `None` when the acknowledgment came but the result did not.
    pub fn request(
        &self,
        action: &str,
        params: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<Option<Reply>> {
        let Some(ack) = self.send_command(action, params)? else {
            return Ok(None);
        };
        let result = self.receive_result(timeout)?;
        Ok(Some(Reply { ack, result }))
    }

    /// Discards results that are already waiting, returning how many.
    ///
    /// Useful before a command whose result must not be confused with a stale
    /// one left behind by an earlier timeout.
    pub fn drain_results(&self) -> Result<usize> {
        let mut drained = 0;
        while self.receive_result(Some(Duration::ZERO))?.is_some() {
            drained += 1;
        }
        if drained > 0 {
            debug!("Discarded {} stale result(s)", drained);
        }
        Ok(drained)
    }

    /// Releases every endpoint and the transport. Later calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for endpoint in Endpoint::ALL {
            let mut guard = self
                .slot(endpoint)
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(mut channel) = guard.take() {
                channel.close();
            }
        }
        self.transport.terminate();
        self.note(format_args!("Connections closed"));
    }
}

impl<T: Transport> Drop for BridgeClient<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Transport> fmt::Debug for BridgeClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeClient")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport with scripted replies.
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    pub struct MockState {
        /// Scripted frames per address; `None` entries are timeouts.
        pub replies: HashMap<String, VecDeque<Option<Vec<u8>>>>,
        pub sent: Vec<(String, String)>,
        pub waits: Vec<(String, Duration)>,
        pub opened: Vec<String>,
        pub closed: Vec<String>,
        pub terminated: usize,
        /// Number of successful opens before `open` starts failing.
        pub fail_after: Option<usize>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn script(&self, address: &str, reply: Option<&str>) {
            self.script_bytes(address, reply.map(str::as_bytes));
        }

        /// Scripts a raw frame, which need not be valid UTF-8.
        pub fn script_bytes(&self, address: &str, reply: Option<&[u8]>) {
            let mut state = self.state.lock().unwrap();
            state
                .replies
                .entry(address.to_string())
                .or_default()
                .push_back(reply.map(<[u8]>::to_vec));
        }
    }

    pub struct MockChannel {
        address: String,
        state: Arc<Mutex<MockState>>,
    }

    impl Channel for MockChannel {
        fn send(&mut self, frame: &str) -> Result<()> {
            let mut state = self.state.lock()?;
            state.sent.push((self.address.clone(), frame.to_string()));
            Ok(())
        }

        fn recv(&mut self, timeout: Duration) -> Result<Option<String>> {
            let reply = {
                let mut state = self.state.lock()?;
                state.waits.push((self.address.clone(), timeout));
                state
                    .replies
                    .get_mut(&self.address)
                    .and_then(VecDeque::pop_front)
                    .flatten()
            };
            match reply {
                Some(bytes) => Ok(Some(String::from_utf8(bytes)?)),
                None => {
                    std::thread::sleep(timeout.min(Duration::from_millis(1)));
                    Ok(None)
                }
            }
        }

        fn close(&mut self) {
            let mut state = self.state.lock().unwrap();
            state.closed.push(self.address.clone());
        }
    }

    impl Transport for MockTransport {
        type Channel = MockChannel;

        fn open(&self, _role: Role, address: &str) -> Result<MockChannel> {
            let mut state = self.state.lock()?;
            if state.fail_after == Some(state.opened.len()) {
                return Err(BridgeError::Transport(format!("cannot open {}", address)));
            }
            state.opened.push(address.to_string());
            Ok(MockChannel {
                address: address.to_string(),
                state: Arc::clone(&self.state),
            })
        }

        fn terminate(&self) {
            self.state.lock().unwrap().terminated += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use bridge_common::Timeouts;
    use serde_json::json;

    const COMMAND: &str = "localhost:2201";
    const RESULT: &str = "localhost:2202";
    const QUOTE: &str = "localhost:2203";
    const EVENT: &str = "localhost:2204";

    fn client() -> (BridgeClient<MockTransport>, MockTransport) {
        let transport = MockTransport::default();
        let client = BridgeClient::with_transport(BridgeConfig::default(), transport.clone()).unwrap();
        (client, transport)
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn opens_all_four_endpoints() {
        let (client, transport) = client();
        assert_eq!(transport.state.lock().unwrap().opened, vec![COMMAND, RESULT, QUOTE, EVENT]);
        assert_eq!(client.endpoint_address(Endpoint::Quote), QUOTE);
        assert!(!client.is_closed());
    }

    #[test]
    fn command_returns_acknowledgment() {
        let (client, transport) = client();
        transport.script(COMMAND, Some("ok"));

        let ack = client.send_command("ACCOUNT", Map::new()).unwrap();
        assert_eq!(ack.as_deref(), Some("ok"));

        let state = transport.state.lock().unwrap();
        let (address, frame) = &state.sent[0];
        assert_eq!(address, COMMAND);
        let sent: Value = serde_json::from_str(frame).unwrap();
        assert_eq!(sent, json!({"action": "ACCOUNT"}));
        assert_eq!(state.waits[0], (COMMAND.to_string(), Duration::from_millis(5000)));
    }

    #[test]
    fn command_merges_params_and_ignores_action_key() {
        let (client, transport) = client();
        transport.script(COMMAND, Some("ok"));

        client
            .send_command(
                "TRADE",
                params(json!({"action": "HIJACK", "symbol": "EURUSD", "volume": 0.1})),
            )
            .unwrap();

        let state = transport.state.lock().unwrap();
        let sent: Value = serde_json::from_str(&state.sent[0].1).unwrap();
        assert_eq!(sent, json!({"action": "TRADE", "symbol": "EURUSD", "volume": 0.1}));
    }

    #[test]
    fn empty_action_is_rejected_before_sending() {
        let (client, transport) = client();
        assert!(matches!(
            client.send_command("", Map::new()),
            Err(BridgeError::Config(_))
        ));
        assert!(transport.state.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn result_is_parsed() {
        let (client, transport) = client();
        transport.script(RESULT, Some(r#"{"error": false, "data": {"balance": 10000}}"#));

        let payload = client.receive_result(None).unwrap().unwrap();
        assert!(!payload.is_error());
        assert_eq!(payload.data().unwrap()["balance"], 10000);
    }

    #[test]
    fn malformed_result_becomes_error_envelope() {
        let (client, transport) = client();
        transport.script(RESULT, Some("not json"));

        let payload = client.receive_result(None).unwrap().unwrap();
        assert!(payload.is_error());
        assert!(payload.description().unwrap().contains("decode"));
        assert!(payload.get("raw_error").is_some());
    }

    #[test]
    fn malformed_pushes_become_error_envelopes_too() {
        let (client, transport) = client();
        transport.script(QUOTE, Some("{truncated"));
        transport.script(EVENT, Some("garbage"));

        assert!(client.receive_quote(None).unwrap().unwrap().is_decode_failure());
        assert!(client.receive_event(None).unwrap().unwrap().is_decode_failure());
    }

    #[test]
    fn invalid_utf8_becomes_error_envelope() {
        let (client, transport) = client();
        let corrupted = b"{\"error\":false,\"data\":\"\xff\xfe\"}";
        transport.script_bytes(RESULT, Some(corrupted));
        transport.script_bytes(QUOTE, Some(corrupted));
        transport.script_bytes(EVENT, Some(corrupted));

        for payload in [
            client.receive_result(None).unwrap().unwrap(),
            client.receive_quote(None).unwrap().unwrap(),
            client.receive_event(None).unwrap().unwrap(),
        ] {
            assert!(payload.is_error());
            assert!(payload.is_decode_failure());
        }
    }

    #[test]
    fn invalid_utf8_acknowledgment_is_a_protocol_error() {
        let (client, transport) = client();
        transport.script_bytes(COMMAND, Some(b"{\"status\":\"\xc3\x28\"}"));
        assert!(matches!(
            client.send_command("PING", Map::new()),
            Err(BridgeError::Protocol(_))
        ));
    }

    #[test]
    fn timeouts_are_absent_values() {
        let (client, _transport) = client();
        assert_eq!(client.send_command("PING", Map::new()).unwrap(), None);
        assert_eq!(client.receive_result(None).unwrap(), None);
        assert_eq!(client.receive_quote(None).unwrap(), None);
        assert_eq!(client.receive_event(None).unwrap(), None);
    }

    #[test]
    fn client_recovers_after_acknowledgment_timeout() {
        let (client, transport) = client();
        transport.script(COMMAND, None);
        transport.script(COMMAND, Some("ok"));

        assert_eq!(client.send_command("ACCOUNT", Map::new()).unwrap(), None);
        assert_eq!(
            client.send_command("BALANCE", Map::new()).unwrap().as_deref(),
            Some("ok")
        );

        let state = transport.state.lock().unwrap();
        let sent: Value = serde_json::from_str(&state.sent[1].1).unwrap();
        assert_eq!(sent, json!({"action": "BALANCE"}));
    }

    #[test]
    fn timeout_override_applies_to_one_call() {
        let (client, transport) = client();

        client.receive_result(Some(Duration::from_millis(50))).unwrap();
        client.receive_result(None).unwrap();
        client.receive_quote(Some(Duration::from_millis(5))).unwrap();
        client.receive_quote(None).unwrap();
        client.receive_event(None).unwrap();

        let waits: Vec<Duration> = transport.state.lock().unwrap().waits.iter().map(|(_, d)| *d).collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_millis(50),
                Duration::from_millis(5000),
                Duration::from_millis(5),
                Duration::from_millis(1000),
                Duration::from_millis(1000),
            ]
        );
    }

    #[test]
    fn configured_timeouts_are_used() {
        let transport = MockTransport::default();
        let timeouts = Timeouts {
            command: Duration::from_millis(250),
            result: Duration::from_millis(750),
            ..Timeouts::default()
        };
        let config = BridgeConfig::default().with_timeouts(timeouts);
        let client = BridgeClient::with_transport(config, transport.clone()).unwrap();

        client.send_command("PING", Map::new()).unwrap();
        client.receive_result(None).unwrap();

        let waits: Vec<Duration> = transport.state.lock().unwrap().waits.iter().map(|(_, d)| *d).collect();
        assert_eq!(waits, vec![Duration::from_millis(250), Duration::from_millis(750)]);
    }

    #[test]
    fn request_pairs_ack_with_result() {
        let (client, transport) = client();
        transport.script(COMMAND, Some("ok"));
        transport.script(RESULT, Some(r#"{"error": false, "data": [1, 2]}"#));

        let reply = client.request("POSITIONS", Map::new(), None).unwrap().unwrap();
        assert_eq!(reply.ack, "ok");
        assert_eq!(reply.result.unwrap().data_len(), Some(2));

        assert_eq!(client.request("POSITIONS", Map::new(), None).unwrap(), None);
    }

    #[test]
    fn drain_discards_waiting_results() {
        let (client, transport) = client();
        transport.script(RESULT, Some(r#"{"error": false}"#));
        transport.script(RESULT, Some(r#"{"error": true}"#));

        assert_eq!(client.drain_results().unwrap(), 2);
        assert_eq!(client.drain_results().unwrap(), 0);
        assert!(
            transport
                .state
                .lock()
                .unwrap()
                .waits
                .iter()
                .all(|(_, d)| d.is_zero())
        );
    }

    #[test]
    fn close_is_idempotent() {
        let (client, transport) = client();
        client.close();
        client.close();
        drop(client);

        let state = transport.state.lock().unwrap();
        assert_eq!(state.terminated, 1);
        assert_eq!(state.closed.len(), 4);
    }

    #[test]
    fn operations_after_close_fail() {
        let (client, _transport) = client();
        client.close();
        assert!(client.is_closed());
        assert!(matches!(
            client.send_command("ACCOUNT", Map::new()),
            Err(BridgeError::Closed)
        ));
        assert!(matches!(client.receive_quote(None), Err(BridgeError::Closed)));
    }

    #[test]
    fn partial_construction_is_cleaned_up() {
        let transport = MockTransport::default();
        transport.state.lock().unwrap().fail_after = Some(2);

        let result = BridgeClient::with_transport(BridgeConfig::default(), transport.clone());
        assert!(matches!(result, Err(BridgeError::Transport(_))));

        let state = transport.state.lock().unwrap();
        assert_eq!(state.opened, vec![COMMAND, RESULT]);
        assert_eq!(state.closed, vec![COMMAND, RESULT]);
        assert_eq!(state.terminated, 1);
    }

    #[test]
    fn invalid_config_terminates_transport() {
        let transport = MockTransport::default();
        let result = BridgeClient::with_transport(BridgeConfig::new("  "), transport.clone());
        assert!(matches!(result, Err(BridgeError::Config(_))));

        let state = transport.state.lock().unwrap();
        assert!(state.opened.is_empty());
        assert_eq!(state.terminated, 1);
    }

    #[test]
    fn endpoints_are_locked_independently() {
        use std::sync::Arc;
        use std::thread;

        let (client, transport) = client();
        for _ in 0..50 {
            transport.script(QUOTE, Some(r#"{"symbol":"EURUSD"}"#));
            transport.script(COMMAND, Some("ok"));
        }
        let client = Arc::new(client);

        let poller = {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                (0..50)
                    .filter(|_| client.receive_quote(None).unwrap().is_some())
                    .count()
            })
        };
        let acks = (0..50)
            .filter(|_| client.send_command("PING", Map::new()).unwrap().is_some())
            .count();

        assert_eq!(poller.join().unwrap(), 50);
        assert_eq!(acks, 50);
    }
}
