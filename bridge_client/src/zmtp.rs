//! ZMTP implementation of the transport seam.
//!
//! Opening an endpoint starts its I/O thread, the way a ZeroMQ socket connects
//! in the background: the thread connects, handshakes, reconnects whenever the
//! bridge goes away and queues every received message on a `crossbeam_channel`
//! that `recv` reads. Pushes sent right after construction are therefore kept,
//! an unreachable bridge shows up as a receive timeout and a host that does
//! not resolve is an error.
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bridge_common::zmtp::{Connection, SocketType};
use bridge_common::{BridgeError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, warn};

use crate::transport::{Channel, Role, Transport};

/// Bound on one TCP connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Bound on the greeting and `READY` exchange, whatever the caller's timeout.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause between connect attempts while the bridge refuses connections.
const RECONNECT_INTERVAL: Duration = Duration::from_millis(100);
/// Pause between attempts while the host does not resolve.
const RESOLVE_RETRY: Duration = Duration::from_secs(1);
/// Longest the I/O thread blocks before looking at its controls again.
const IO_POLL: Duration = Duration::from_millis(20);
/// Longest `recv` waits before re-checking resolution and termination.
const STATUS_POLL: Duration = Duration::from_millis(50);
/// Received messages queued before the I/O thread stops reading the socket.
pub const RECV_HIGH_WATER: usize = 1000;

/// Shared context for ZMTP endpoints.
#[derive(Debug, Default)]
pub struct ZmtpTransport {
    terminated: Arc<AtomicBool>,
}

impl ZmtpTransport {
    /// Fresh context; endpoints opened from it run until it is terminated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `terminate` was called.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Splits `host:port` (or `[v6]:port`) and checks both halves.
fn check_address(address: &str) -> Result<()> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| BridgeError::Address(format!("{} has no port", address)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(BridgeError::Address(format!("{} has an invalid host", address)));
    }
    match port.parse::<u16>() {
        Ok(port) if port > 0 => Ok(()),
        _ => Err(BridgeError::Address(format!("{} has an invalid port", address))),
    }
}

impl Transport for ZmtpTransport {
    type Channel = ZmtpChannel;

    fn open(&self, role: Role, address: &str) -> Result<ZmtpChannel> {
        if self.is_terminated() {
            return Err(BridgeError::Closed);
        }
        check_address(address)?;
        ZmtpChannel::start(address, role.socket_type(), Arc::clone(&self.terminated))
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Link status published by the I/O thread.
#[derive(Debug, Default)]
struct Link {
    connected: AtomicBool,
    /// Why the host did not resolve on the last attempt.
    unresolved: Mutex<Option<String>>,
}

impl Link {
    fn set_unresolved(&self, reason: Option<String>) {
        if let Ok(mut guard) = self.unresolved.lock() {
            *guard = reason;
        }
    }
}

/// Instructions from the channel to its I/O thread.
#[derive(Debug)]
enum Control {
    /// Write `frame` as request number `id`.
    Request { id: u64, frame: String },
    /// The caller gave up on the outstanding request.
    Abandon,
}

/// Received message, tagged with the request it answers on REQ endpoints.
type Inbound = (u64, Vec<Vec<u8>>);

/// One ZMTP endpoint (REQ or PULL) backed by its own I/O thread.
#[derive(Debug)]
pub struct ZmtpChannel {
    address: String,
    socket_type: SocketType,
    terminated: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    link: Arc<Link>,
    control: Sender<Control>,
    inbox: Receiver<Inbound>,
    worker: Option<JoinHandle<()>>,
    next_id: u64,
    /// Request whose acknowledgment is still expected.
    awaiting: Option<u64>,
    closed: bool,
}

impl ZmtpChannel {
    fn start(address: &str, socket_type: SocketType, terminated: Arc<AtomicBool>) -> Result<Self> {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (inbox_tx, inbox_rx) = crossbeam_channel::bounded(RECV_HIGH_WATER);
        let stop = Arc::new(AtomicBool::new(false));
        let link = Arc::new(Link::default());

        let worker = IoWorker {
            address: String::from(address),
            socket_type,
            stop: Arc::clone(&stop),
            terminated: Arc::clone(&terminated),
            link: Arc::clone(&link),
            control: control_rx,
            inbox: inbox_tx,
            connection: None,
            pending: None,
            outstanding: None,
        };
        let handle = thread::Builder::new()
            .name(format!("zmtp-{}-{}", socket_type, address))
            .spawn(move || worker.run())?;

        Ok(ZmtpChannel {
            address: String::from(address),
            socket_type,
            terminated,
            stop,
            link,
            control: control_tx,
            inbox: inbox_rx,
            worker: Some(handle),
            next_id: 0,
            awaiting: None,
            closed: false,
        })
    }

    /// `host:port` this endpoint connects to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the I/O thread currently holds a handshaken connection.
    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed || self.terminated.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        Ok(())
    }

    fn unresolved(&self) -> Result<Option<String>> {
        Ok(self.link.unresolved.lock()?.clone())
    }

    /// Forgets the outstanding request so a late reply can never be paired
    /// with the next one.
    fn abandon(&mut self) {
        if self.awaiting.take().is_some() {
            let _ = self.control.send(Control::Abandon);
        }
    }

    fn frame_text(&self, mut parts: Vec<Vec<u8>>) -> Result<String> {
        if self.socket_type == SocketType::Req {
            if parts.first().map(Vec::is_empty) != Some(true) {
                return Err(BridgeError::Protocol(String::from(
                    "reply is missing the empty delimiter frame",
                )));
            }
            parts.remove(0);
        }
        Ok(String::from_utf8(parts.concat())?)
    }
}

impl Channel for ZmtpChannel {
    fn send(&mut self, frame: &str) -> Result<()> {
        self.check_open()?;
        if self.socket_type != SocketType::Req {
            return Err(BridgeError::State(format!(
                "{} endpoint {} is receive-only",
                self.socket_type, self.address
            )));
        }
        if self.awaiting.is_some() {
            return Err(BridgeError::State(String::from(
                "cannot send a new request before the previous acknowledgment was received",
            )));
        }
        self.next_id += 1;
        self.control
            .send(Control::Request {
                id: self.next_id,
                frame: String::from(frame),
            })
            .map_err(|e| BridgeError::ChannelSend(e.to_string()))?;
        self.awaiting = Some(self.next_id);
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<String>> {
        self.check_open()?;
        let expected = match (self.socket_type, self.awaiting) {
            (SocketType::Req, None) => {
                return Err(BridgeError::State(String::from(
                    "cannot receive before a request was sent",
                )));
            }
            (_, awaiting) => awaiting,
        };
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(reason) = self.unresolved()? {
                self.abandon();
                return Err(BridgeError::Resolve(reason));
            }
            let wait = deadline.saturating_duration_since(Instant::now()).min(STATUS_POLL);
            match self.inbox.recv_timeout(wait) {
                Ok((id, parts)) => {
                    if expected.is_some_and(|expected| expected != id) {
                        debug!("{} discarding a reply to abandoned request {}", self.address, id);
                        continue;
                    }
                    self.awaiting = None;
                    return self.frame_text(parts).map(Some);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        self.abandon();
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(BridgeError::Closed),
            }
            self.check_open()?;
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("I/O thread of {} panicked", self.address);
            }
        }
    }
}

impl Drop for ZmtpChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connection owner running on the endpoint's I/O thread.
struct IoWorker {
    address: String,
    socket_type: SocketType,
    stop: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
    link: Arc<Link>,
    control: Receiver<Control>,
    inbox: Sender<Inbound>,
    connection: Option<Connection>,
    /// Request not written yet; kept across reconnects.
    pending: Option<(u64, String)>,
    /// Request written and not answered yet.
    outstanding: Option<u64>,
}

impl IoWorker {
    fn running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst) && !self.terminated.load(Ordering::SeqCst)
    }

    fn run(mut self) {
        debug!("{} I/O thread for {} started", self.socket_type, self.address);
        while self.running() {
            self.apply_controls();
            if self.connection.is_none() {
                if let Some(pause) = self.connect() {
                    self.pause(pause);
                    continue;
                }
            }
            let step = match self.socket_type {
                SocketType::Req => self.step_request(),
                _ => self.step_pull(),
            };
            if let Err(e) = step {
                match e {
                    BridgeError::Connection(_) | BridgeError::Transport(_) => {
                        debug!("{} endpoint {} lost its peer: {}", self.socket_type, self.address, e)
                    }
                    _ => warn!("{} endpoint {} dropped the connection: {}", self.socket_type, self.address, e),
                }
                // A reply to a request written on the old stream cannot come back.
                self.outstanding = None;
                self.drop_connection();
            }
        }
        self.drop_connection();
        debug!("{} I/O thread for {} stopped", self.socket_type, self.address);
    }

    fn apply_controls(&mut self) {
        loop {
            match self.control.try_recv() {
                Ok(control) => self.apply(control),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.stop.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    fn apply(&mut self, control: Control) {
        match control {
            Control::Request { id, frame } => self.pending = Some((id, frame)),
            Control::Abandon => {
                self.pending = None;
                if self.outstanding.take().is_some() {
                    self.drop_connection();
                }
            }
        }
    }

    /// One connect and handshake over every resolved address.
    ///
    /// Returns how long to wait before the next attempt when none succeeded.
    fn connect(&mut self) -> Option<Duration> {
        let addrs: Vec<SocketAddr> = match self.address.to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                debug!("{} does not resolve: {}", self.address, e);
                self.link.set_unresolved(Some(format!("{}: {}", self.address, e)));
                return Some(RESOLVE_RETRY);
            }
        };
        if addrs.is_empty() {
            self.link.set_unresolved(Some(self.address.clone()));
            return Some(RESOLVE_RETRY);
        }
        self.link.set_unresolved(None);

        for addr in addrs {
            if !self.running() {
                return Some(IO_POLL);
            }
            let stream = match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("{} connect to {} failed: {}", self.socket_type, addr, e);
                    continue;
                }
            };
            match Connection::handshake(stream, self.socket_type, Instant::now() + HANDSHAKE_TIMEOUT) {
                Ok(Some(connection)) => {
                    debug!("{} endpoint connected to {}", self.socket_type, addr);
                    self.connection = Some(connection);
                    self.link.connected.store(true, Ordering::SeqCst);
                    return None;
                }
                Ok(None) => debug!("{} handshake with {} timed out", self.socket_type, addr),
                Err(BridgeError::Connection(e)) => {
                    debug!("{} handshake with {} dropped: {}", self.socket_type, addr, e)
                }
                Err(e) => warn!("{} handshake with {} failed: {}", self.socket_type, addr, e),
            }
        }
        Some(RECONNECT_INTERVAL)
    }

    fn drop_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.shutdown();
        }
        self.link.connected.store(false, Ordering::SeqCst);
    }

    /// Sleeps in short slices so a stop request is honoured quickly.
    fn pause(&self, duration: Duration) {
        let until = Instant::now() + duration;
        while self.running() {
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            thread::sleep(left.min(IO_POLL));
        }
    }

    /// Writes the queued request, else reads its reply, else waits for the
    /// next instruction.
    fn step_request(&mut self) -> Result<()> {
        if let Some((id, frame)) = self.pending.take() {
            let Some(connection) = self.connection.as_mut() else {
                self.pending = Some((id, frame));
                return Ok(());
            };
            if let Err(e) = connection.send(&[b"".as_slice(), frame.as_bytes()]) {
                self.pending = Some((id, frame));
                return Err(e);
            }
            self.outstanding = Some(id);
            return Ok(());
        }
        if self.outstanding.is_some() {
            return self.read();
        }
        match self.control.recv_timeout(IO_POLL) {
            Ok(control) => self.apply(control),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.stop.store(true, Ordering::SeqCst),
        }
        Ok(())
    }

    fn step_pull(&mut self) -> Result<()> {
        if self.inbox.is_full() {
            thread::sleep(IO_POLL);
            return Ok(());
        }
        self.read()
    }

    /// Forwards the next message that arrives within `IO_POLL`.
    fn read(&mut self) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(());
        };
        let Some(parts) = connection.recv(Instant::now() + IO_POLL)? else {
            return Ok(());
        };
        let id = if self.socket_type == SocketType::Req {
            match self.outstanding.take() {
                Some(id) => id,
                None => {
                    debug!("{} dropping a reply nobody asked for", self.address);
                    return Ok(());
                }
            }
        } else {
            0
        };
        if self.inbox.send((id, parts)).is_err() {
            self.stop.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}
