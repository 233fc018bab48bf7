//! End-to-end tests of the ZMTP client against the simulated bridge.
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bridge_client::BridgeClient;
use bridge_client::capture::ResponseCapture;
use bridge_client::health;
use bridge_client::smoke::{self, SmokeOptions, SmokeSuite};
use bridge_common::payload::{Tick, TickData, TradeEvent};
use bridge_common::{Action, BridgeConfig, BridgeError, Endpoint, Ports, Request, Timeouts};
use bridge_sim::{SimBridge, SimConfig, SimHandle};
use serde_json::{Map, Value, json};

const WAIT: Option<Duration> = Some(Duration::from_secs(3));

fn start_sim() -> SimHandle {
    SimBridge::start(SimConfig::ephemeral().with_tick_interval(Duration::from_millis(20))).unwrap()
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Four ports nothing listens on.
fn closed_ports() -> Ports {
    let listeners: Vec<TcpListener> = (0..4).map(|_| TcpListener::bind("127.0.0.1:0").unwrap()).collect();
    let port = |i: usize| listeners[i].local_addr().unwrap().port();
    Ports {
        command: port(0),
        result: port(1),
        quote: port(2),
        event: port(3),
    }
}

#[test]
fn account_round_trip() {
    let sim = start_sim();
    let client = BridgeClient::connect(sim.client_config()).unwrap();

    let ack = client.send_command("ACCOUNT", Map::new()).unwrap().unwrap();
    let ack: Value = serde_json::from_str(&ack).unwrap();
    assert_eq!(ack["status"], "ok");

    let result = client.receive_result(WAIT).unwrap().unwrap();
    assert!(!result.is_error());
    assert_eq!(result.data().unwrap()["balance"], 10000.0);
}

#[test]
fn bridge_errors_are_surfaced_verbatim() {
    let sim = start_sim();
    let client = BridgeClient::connect(sim.client_config()).unwrap();

    let reply = client.request("TELEPORT", Map::new(), WAIT).unwrap().unwrap();
    let result = reply.result.unwrap();
    assert!(result.is_error());
    assert_eq!(result.description(), Some("Unknown action"));
}

#[test]
fn trade_emits_result_and_event() {
    let sim = start_sim();
    let client = BridgeClient::connect(sim.client_config()).unwrap();

    let reply = client
        .request(
            "TRADE",
            params(json!({"actionType": "ORDER_TYPE_SELL", "symbol": "XAUUSD", "volume": 0.5})),
            WAIT,
        )
        .unwrap()
        .unwrap();
    let result = reply.result.unwrap();
    let ticket = result.get("order").and_then(Value::as_u64).unwrap();

    let event = client.receive_event(WAIT).unwrap().unwrap();
    let event = TradeEvent::from_payload(&event).unwrap();
    assert_eq!(event.ticket, Some(ticket));
    assert_eq!(event.kind.as_deref(), Some("sell"));
    assert_eq!(event.volume, Some(0.5));

    let positions = client.request("POSITIONS", Map::new(), WAIT).unwrap().unwrap();
    assert_eq!(positions.result.unwrap().data_len(), Some(1));
}

#[test]
fn subscription_streams_ticks() {
    let sim = start_sim();
    let client = BridgeClient::connect(sim.client_config()).unwrap();

    let subscribe = Request::from(Action::Config)
        .param("actionType", "CONFIG")
        .param("symbol", "BTCUSD")
        .param("chartTF", "TICK");
    assert!(client.send_request(&subscribe).unwrap().is_some());
    assert!(!client.receive_result(WAIT).unwrap().unwrap().is_error());

    let payload = client.receive_quote(WAIT).unwrap().unwrap();
    let tick = Tick::from_payload(&payload).unwrap();
    assert_eq!(tick.symbol, "BTCUSD");
    assert!(matches!(tick.data, Some(TickData::Quote { bid, ask, .. }) if ask > bid));
}

#[test]
fn quotes_can_be_polled_while_commands_run() {
    let sim = start_sim();
    let client = Arc::new(BridgeClient::connect(sim.client_config()).unwrap());
    let subscribe = Request::from(Action::Config)
        .param("symbol", "EURUSD")
        .param("chartTF", "TICK");
    client.send_request(&subscribe).unwrap().unwrap();
    client.receive_result(WAIT).unwrap().unwrap();

    let poller = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            let mut received = 0;
            let started = Instant::now();
            while received < 10 && started.elapsed() < Duration::from_secs(5) {
                if client.receive_quote(Some(Duration::from_millis(200))).unwrap().is_some() {
                    received += 1;
                }
            }
            received
        })
    };
    for _ in 0..5 {
        let reply = client.request("BALANCE", Map::new(), WAIT).unwrap().unwrap();
        assert!(!reply.result.unwrap().is_error());
    }
    assert_eq!(poller.join().unwrap(), 10);
}

#[test]
fn drain_collects_results_with_zero_timeouts() {
    let sim = start_sim();
    let client = BridgeClient::connect(sim.client_config()).unwrap();
    client.send_command("BALANCE", Map::new()).unwrap().unwrap();

    let mut drained = 0;
    let started = Instant::now();
    while drained == 0 && started.elapsed() < Duration::from_secs(3) {
        drained += client.drain_results().unwrap();
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(drained, 1);
    assert_eq!(client.receive_result(Some(Duration::from_millis(100))).unwrap(), None);
}

#[test]
fn unreachable_bridge_times_out() {
    let timeouts = Timeouts {
        command: Duration::from_millis(200),
        result: Duration::from_millis(200),
        quote: Duration::from_millis(100),
        event: Duration::from_millis(100),
    };
    let config = BridgeConfig::new("127.0.0.1")
        .with_ports(closed_ports())
        .with_timeouts(timeouts);
    let client = BridgeClient::connect(config).unwrap();

    let started = Instant::now();
    assert_eq!(client.send_command("ACCOUNT", Map::new()).unwrap(), None);
    assert_eq!(client.receive_result(None).unwrap(), None);
    assert_eq!(client.receive_quote(None).unwrap(), None);
    assert_eq!(client.receive_event(None).unwrap(), None);
    assert!(started.elapsed() < Duration::from_secs(3));

    // Still usable after the timeout.
    assert_eq!(client.send_command("BALANCE", Map::new()).unwrap(), None);
}

#[test]
fn unresolvable_host_is_an_error() {
    let client = BridgeClient::connect(BridgeConfig::new("no-such-host.invalid")).unwrap();
    assert!(matches!(
        client.send_command("ACCOUNT", Map::new()),
        Err(BridgeError::Resolve(_))
    ));
}

#[test]
fn closed_client_refuses_work() {
    let sim = start_sim();
    let client = BridgeClient::connect(sim.client_config()).unwrap();
    client.send_command("PING", Map::new()).unwrap().unwrap();

    client.close();
    client.close();
    assert!(client.is_closed());
    assert!(matches!(
        client.send_command("PING", Map::new()),
        Err(BridgeError::Closed)
    ));
    assert!(matches!(client.receive_result(None), Err(BridgeError::Closed)));
}

#[test]
fn health_probe_sees_the_simulator() {
    let sim = start_sim();
    let report = health::probe(&sim.client_config(), health::PROBE_TIMEOUT);
    assert!(report.is_healthy(), "{}", report);

    let config = sim.client_config();
    sim.shutdown();
    let report = health::probe(&config, health::PROBE_TIMEOUT);
    assert!(!report.is_healthy());
    assert_eq!(report.failures().count(), Endpoint::ALL.len());
}

#[test]
fn smoke_suite_passes() {
    let sim = start_sim();
    let client = BridgeClient::connect(sim.client_config()).unwrap();
    let options = SmokeOptions {
        bar_window: Duration::from_millis(500),
        tick_window: Duration::from_millis(500),
        ..SmokeOptions::default()
    };
    let checks = SmokeSuite::new(&client, options).run().unwrap();
    assert!(smoke::all_passed(&checks), "{:?}", checks);
}

#[test]
fn capture_writes_samples() {
    let sim = start_sim();
    let client = BridgeClient::connect(sim.client_config()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut capture = ResponseCapture::new(&client, dir.path())
        .unwrap()
        .with_result_timeout(Duration::from_secs(3));

    for (name, request) in bridge_client::capture::default_plan() {
        capture.capture_command(&name, &request).unwrap();
    }
    assert!(capture.entries().iter().all(|entry| entry.succeeded()));
    assert!(dir.path().join("history_bars.json").exists());

    let samples = capture
        .capture_stream("LIVE_STREAM_M1", Endpoint::Quote, Duration::from_millis(300))
        .unwrap();
    assert!(!samples.is_empty());
    assert!(dir.path().join("live_stream_m1.json").exists());
}
