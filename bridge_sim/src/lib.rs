//! Simulated MT5 JsonAPI bridge.
//!
//! Binds the four bridge endpoints on TCP and speaks ZMTP on them, so the
//! client can be exercised end to end without a trading terminal:
//!
//! - `server` — the REP command endpoint and the three PUSH endpoints.
//! - `responder` — turns requests into acknowledgments and canned results.
//! - `generator` — random-walk quote stream for `CONFIG` subscriptions.
//! - `model` — prices and the simulated account.
//!
//! Wiring: the command endpoint hands each request to the `Responder`, which
//! queues result and event frames on `crossbeam_channel` queues drained by the
//! push endpoints. `CONFIG` requests subscribe symbols on the generator, which
//! feeds the quote queue.
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bridge_common::net;
use bridge_common::{BridgeConfig, Endpoint, Ports, Result};
use log::{error, info};

use crate::generator::QuoteGenerator;
use crate::responder::Responder;
use crate::server::{CommandEndpoint, Outbound, PushEndpoint};

pub mod generator;
pub mod model;
pub mod responder;
pub mod server;

/// Default pause between two generated quote pushes.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Where and how fast the simulator runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Address to bind, e.g. `127.0.0.1` or `0.0.0.0`.
    pub host: String,
    /// Ports to bind; `0` picks a free port.
    pub ports: Ports,
    pub tick_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            ports: Ports::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl SimConfig {
    /// Loopback configuration on four free ports, for tests.
    pub fn ephemeral() -> Self {
        Self {
            ports: Ports {
                command: 0,
                result: 0,
                quote: 0,
                event: 0,
            },
            ..Self::default()
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

/// Entry point for starting a simulator.
pub struct SimBridge;

impl SimBridge {
    /// Binds all endpoints and starts their threads.
    ///
    /// Nothing is started unless all four ports could be bound.
    pub fn start(config: SimConfig) -> Result<SimHandle> {
        let bind = |endpoint: Endpoint| TcpListener::bind(net::addr(&config.host, config.ports.get(endpoint)));
        let command_listener = bind(Endpoint::Command)?;
        let result_listener = bind(Endpoint::Result)?;
        let quote_listener = bind(Endpoint::Quote)?;
        let event_listener = bind(Endpoint::Event)?;
        let ports = Ports {
            command: command_listener.local_addr()?.port(),
            result: result_listener.local_addr()?.port(),
            quote: quote_listener.local_addr()?.port(),
            event: event_listener.local_addr()?.port(),
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handle = SimHandle {
            host: config.host.clone(),
            ports,
            shutdown: Arc::clone(&shutdown),
            threads: Vec::new(),
        };

        let (result_tx, result_rx) = crossbeam_channel::unbounded::<String>();
        let (quote_tx, quote_rx) = crossbeam_channel::unbounded::<String>();
        let (event_tx, event_rx) = crossbeam_channel::unbounded::<String>();

        let (subscriptions, generator) =
            QuoteGenerator::start(config.tick_interval, quote_tx.clone(), Arc::clone(&shutdown));
        handle.threads.push(generator);

        let outbound = Outbound {
            result: result_tx,
            quote: quote_tx,
            event: event_tx,
        };
        let responder = Arc::new(Mutex::new(Responder::new(subscriptions)));

        // On error `handle` is dropped here, which stops what already runs.
        handle.threads.push(PushEndpoint::spawn(
            Endpoint::Result,
            result_listener,
            result_rx,
            Arc::clone(&shutdown),
        )?);
        handle.threads.push(PushEndpoint::spawn(
            Endpoint::Quote,
            quote_listener,
            quote_rx,
            Arc::clone(&shutdown),
        )?);
        handle.threads.push(PushEndpoint::spawn(
            Endpoint::Event,
            event_listener,
            event_rx,
            Arc::clone(&shutdown),
        )?);
        handle.threads.push(CommandEndpoint::spawn(
            command_listener,
            responder,
            outbound,
            Arc::clone(&shutdown),
        )?);

        info!("Simulated bridge running on {} with ports {:?}", config.host, ports);
        Ok(handle)
    }
}

/// A running simulator. Dropping it stops all endpoint threads.
#[derive(Debug)]
pub struct SimHandle {
    host: String,
    ports: Ports,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl SimHandle {
    /// Ports actually bound.
    pub fn ports(&self) -> Ports {
        self.ports
    }

    /// Client configuration pointing at this simulator.
    pub fn client_config(&self) -> BridgeConfig {
        let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { self.host.as_str() };
        BridgeConfig::new(host).with_ports(self.ports)
    }

    /// Shared flag that stops the simulator when set.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Blocks until the shutdown flag is set, then stops.
    pub fn wait(self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(server::POLL_INTERVAL);
        }
        self.shutdown();
    }

    /// Stops every thread and waits for them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("A simulator thread panicked");
            }
        }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
