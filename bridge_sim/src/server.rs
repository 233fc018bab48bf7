//! Listening ZMTP endpoints of the simulated bridge.
//!
//! The command endpoint is a REP socket: each accepted peer gets its own
//! thread that reads requests, replies with the acknowledgment and queues the
//! pushes. Push endpoints serve one peer at a time, newest connection first,
//! and leave messages in their queue while nobody is connected.
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bridge_common::zmtp::{Connection, SocketType};
use bridge_common::{BridgeError, Endpoint, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::responder::Responder;

/// How often idle loops re-check the shutdown flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_POLL: Duration = Duration::from_millis(100);

/// Queues feeding the three push endpoints.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub result: Sender<String>,
    pub quote: Sender<String>,
    pub event: Sender<String>,
}

impl Outbound {
    pub fn send(&self, endpoint: Endpoint, frame: String) -> Result<()> {
        let queue = match endpoint {
            Endpoint::Result => &self.result,
            Endpoint::Quote => &self.quote,
            Endpoint::Event => &self.event,
            Endpoint::Command => {
                return Err(BridgeError::State(String::from(
                    "nothing is pushed on the command endpoint",
                )));
            }
        };
        queue
            .send(frame)
            .map_err(|e| BridgeError::ChannelSend(e.to_string()))
    }
}

/// Accepts one pending connection and runs the handshake.
///
/// `Ok(None)` when nobody is waiting or the peer did not complete the
/// handshake; failed handshakes are logged and skipped.
fn accept(listener: &TcpListener, local: SocketType) -> Result<Option<Connection>> {
    let stream: TcpStream = match listener.accept() {
        Ok((stream, addr)) => {
            debug!("{} endpoint: connection from {}", local, addr);
            stream
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    stream.set_nonblocking(false)?;
    match Connection::handshake(stream, local, Instant::now() + HANDSHAKE_TIMEOUT) {
        Ok(connection) => Ok(connection),
        Err(e) => {
            warn!("{} endpoint: handshake failed: {}", local, e);
            Ok(None)
        }
    }
}

/// REP endpoint answering commands.
pub struct CommandEndpoint;

impl CommandEndpoint {
    pub fn spawn(
        listener: TcpListener,
        responder: Arc<Mutex<Responder>>,
        outbound: Outbound,
        shutdown: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        listener.set_nonblocking(true)?;
        info!("Command endpoint (REP) listening on {}", listener.local_addr()?);
        Ok(thread::spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                match accept(&listener, SocketType::Rep) {
                    Ok(Some(connection)) => {
                        let responder = Arc::clone(&responder);
                        let outbound = outbound.clone();
                        let shutdown = Arc::clone(&shutdown);
                        thread::spawn(move || {
                            if let Err(e) = Self::serve(connection, responder, outbound, shutdown) {
                                debug!("Command peer finished: {}", e);
                            }
                        });
                    }
                    Ok(None) => thread::sleep(POLL_INTERVAL),
                    Err(e) => {
                        error!("Command endpoint accept error: {}", e);
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
            info!("Command endpoint stopped");
        }))
    }

    /// Request loop of one REQ peer; returns when the peer goes away.
    fn serve(
        mut connection: Connection,
        responder: Arc<Mutex<Responder>>,
        outbound: Outbound,
        shutdown: Arc<AtomicBool>,
    ) -> Result<()> {
        while !shutdown.load(Ordering::SeqCst) {
            let Some(parts) = connection.recv(Instant::now() + REQUEST_POLL)? else {
                continue;
            };
            let Some(split) = parts.iter().position(Vec::is_empty) else {
                return Err(BridgeError::Protocol(String::from(
                    "request is missing the empty delimiter frame",
                )));
            };
            let (envelope, body) = parts.split_at(split);
            let frame = String::from_utf8_lossy(&body[1..].concat()).into_owned();

            let outcome = responder.lock()?.handle(&frame);

            let mut reply: Vec<&[u8]> = envelope.iter().map(Vec::as_slice).collect();
            reply.push(b"".as_slice());
            reply.push(outcome.ack.as_bytes());
            connection.send(&reply)?;

            for (endpoint, payload) in outcome.pushes {
                outbound.send(endpoint, payload.to_string())?;
            }
        }
        Ok(())
    }
}

/// PUSH endpoint draining one queue.
pub struct PushEndpoint;

impl PushEndpoint {
    pub fn spawn(
        endpoint: Endpoint,
        listener: TcpListener,
        queue: Receiver<String>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        listener.set_nonblocking(true)?;
        info!("{} endpoint (PUSH) listening on {}", endpoint, listener.local_addr()?);
        Ok(thread::spawn(move || {
            let mut peer: Option<Connection> = None;
            // Taken from the queue but not delivered yet.
            let mut held: Option<String> = None;

            while !shutdown.load(Ordering::SeqCst) {
                match accept(&listener, SocketType::Push) {
                    Ok(Some(connection)) => {
                        info!("{} endpoint: peer connected", endpoint);
                        if let Some(old) = peer.replace(connection) {
                            old.shutdown();
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!("{} endpoint accept error: {}", endpoint, e),
                }
                let Some(connection) = peer.as_mut() else {
                    thread::sleep(POLL_INTERVAL);
                    continue;
                };

                let frame = match held.take() {
                    Some(frame) => frame,
                    None => match queue.recv_timeout(POLL_INTERVAL) {
                        Ok(frame) => frame,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    },
                };
                if let Err(e) = connection.send(&[frame.as_bytes()]) {
                    debug!("{} endpoint: peer lost: {}", endpoint, e);
                    peer = None;
                    held = Some(frame);
                }
            }
            info!("{} endpoint stopped", endpoint);
        }))
    }
}
