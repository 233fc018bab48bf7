//! One established ZMTP session over a TCP stream.
//!
//! Both the client endpoints and the simulator use `Connection`: it performs
//! the NULL handshake, writes multipart messages and reads them back against a
//! deadline. A read that times out keeps every byte received so far, so the
//! next call resumes in the middle of a frame without losing sync.
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use log::debug;

use super::codec::{self, Command, Decoder, SocketType};
use crate::error::BridgeError;
use crate::result::Result;

/// Shortest read timeout handed to the OS; zero would mean "block forever".
const MIN_WAIT: Duration = Duration::from_millis(1);
/// Write timeout applied to every stream.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 64 * 1024;

/// A handshaken ZMTP stream.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    decoder: Decoder,
    local: SocketType,
    peer: SocketType,
    peer_addr: Option<SocketAddr>,
}

impl Connection {
    /// Runs the greeting and `READY` exchange on `stream` as socket type `local`.
    ///
    /// Returns `Ok(None)` when the peer did not finish the handshake before
    /// `deadline`; the stream should then be dropped.
    pub fn handshake(stream: TcpStream, local: SocketType, deadline: Instant) -> Result<Option<Self>> {
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let peer_addr = stream.peer_addr().ok();

        let mut out = codec::greeting().to_vec();
        codec::ready(local).encode(&mut out);
        let mut stream = stream;
        write_all(&mut stream, &out)?;

        let mut decoder = Decoder::new();
        let mut greeted = false;
        loop {
            if !greeted {
                greeted = decoder.greeting()?.is_some();
            }
            if greeted {
                if let Some(frame) = decoder.frame()? {
                    if !frame.command {
                        return Err(BridgeError::Protocol(String::from(
                            "expected READY command after greeting",
                        )));
                    }
                    return match codec::parse_command(&frame.body)? {
                        Command::Ready { socket_type } => {
                            let peer = socket_type
                                .as_deref()
                                .and_then(|name| name.parse::<SocketType>().ok())
                                .ok_or_else(|| {
                                    BridgeError::Protocol(format!(
                                        "peer announced unknown socket type {:?}",
                                        socket_type
                                    ))
                                })?;
                            if !local.accepts(peer) {
                                return Err(BridgeError::Protocol(format!(
                                    "{} socket cannot talk to a {} peer",
                                    local, peer
                                )));
                            }
                            debug!("ZMTP handshake done: {} <-> {} ({:?})", local, peer, peer_addr);
                            Ok(Some(Connection {
                                stream,
                                decoder,
                                local,
                                peer,
                                peer_addr,
                            }))
                        }
                        Command::Error { reason } => Err(BridgeError::Protocol(format!(
                            "peer rejected handshake: {}",
                            reason
                        ))),
                        Command::Ping { .. } => Err(BridgeError::Protocol(String::from(
                            "expected READY, got PING",
                        ))),
                        Command::Other { name } => Err(BridgeError::Protocol(format!(
                            "expected READY, got {}",
                            name
                        ))),
                    };
                }
            }
            if !read_some(&mut stream, &mut decoder, deadline)? {
                return Ok(None);
            }
        }
    }

    /// Socket type this side announced.
    pub fn local_type(&self) -> SocketType {
        self.local
    }

    /// Socket type the peer announced.
    pub fn peer_type(&self) -> SocketType {
        self.peer
    }

    /// Remote address, when the OS still reports it.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Writes one multipart message.
    pub fn send(&mut self, parts: &[&[u8]]) -> Result<()> {
        let bytes = codec::encode_message(parts);
        write_all(&mut self.stream, &bytes)
    }

    /// Reads the next complete message, or `Ok(None)` once `deadline` passes.
    ///
    /// The buffer is checked at least once even when the deadline is already
    /// in the past. Heartbeat pings are answered with a `PONG` on the way.
    pub fn recv(&mut self, deadline: Instant) -> Result<Option<Vec<Vec<u8>>>> {
        let mut first = true;
        loop {
            let message = self.decoder.message()?;
            self.answer_pings()?;
            if let Some(message) = message {
                return Ok(Some(message));
            }
            if !first && Instant::now() >= deadline {
                return Ok(None);
            }
            first = false;
            if !read_some(&mut self.stream, &mut self.decoder, deadline)? {
                return Ok(None);
            }
        }
    }

    fn answer_pings(&mut self) -> Result<()> {
        for context in self.decoder.take_pings() {
            let mut out = Vec::new();
            codec::pong(&context).encode(&mut out);
            write_all(&mut self.stream, &out)?;
        }
        Ok(())
    }

    /// Shuts the TCP stream down in both directions.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> Result<()> {
    stream
        .write_all(bytes)
        .and_then(|_| stream.flush())
        .map_err(|e| BridgeError::Transport(e.to_string()))
}

/// Reads whatever arrives before `deadline` into `decoder`.
///
/// Returns `false` on timeout; a closed peer is a `Connection` error.
fn read_some(stream: &mut TcpStream, decoder: &mut Decoder, deadline: Instant) -> Result<bool> {
    let wait = deadline.saturating_duration_since(Instant::now()).max(MIN_WAIT);
    stream.set_read_timeout(Some(wait))?;
    let mut chunk = vec![0u8; READ_CHUNK];
    match stream.read(&mut chunk) {
        Ok(0) => Err(BridgeError::Connection(String::from("peer closed the connection"))),
        Ok(size) => {
            decoder.extend(&chunk[..size]);
            Ok(true)
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
        Err(e) if e.kind() == ErrorKind::Interrupted => Ok(true),
        Err(e) => Err(BridgeError::Connection(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair(server_type: SocketType, client_type: SocketType) -> (Result<Option<Connection>>, Result<Option<Connection>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            Connection::handshake(stream, server_type, Instant::now() + Duration::from_secs(2))
        });
        let stream = TcpStream::connect(addr).unwrap();
        let client = Connection::handshake(stream, client_type, Instant::now() + Duration::from_secs(2));
        (server.join().unwrap(), client)
    }

    #[test]
    fn push_pull_exchange_messages() {
        let (server, client) = pair(SocketType::Push, SocketType::Pull);
        let mut server = server.unwrap().unwrap();
        let mut client = client.unwrap().unwrap();
        assert_eq!(client.peer_type(), SocketType::Push);

        server.send(&[b"{\"symbol\":\"EURUSD\"}".as_slice()]).unwrap();
        let message = client.recv(Instant::now() + Duration::from_secs(2)).unwrap();
        assert_eq!(message, Some(vec![b"{\"symbol\":\"EURUSD\"}".to_vec()]));
    }

    #[test]
    fn recv_times_out_without_data() {
        let (server, client) = pair(SocketType::Push, SocketType::Pull);
        let _server = server.unwrap().unwrap();
        let mut client = client.unwrap().unwrap();
        let started = Instant::now();
        let message = client.recv(Instant::now() + Duration::from_millis(50)).unwrap();
        assert_eq!(message, None);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn incompatible_peers_are_rejected() {
        let (server, client) = pair(SocketType::Push, SocketType::Req);
        assert!(matches!(server, Err(BridgeError::Protocol(_))));
        assert!(client.is_err());
    }

    #[test]
    fn pings_are_answered_with_pongs() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut out = codec::greeting().to_vec();
            codec::ready(SocketType::Push).encode(&mut out);
            codec::ping(50, b"hb").encode(&mut out);
            out.extend(codec::encode_message(&[b"tick".as_slice()]));
            stream.write_all(&out).unwrap();

            let mut decoder = Decoder::new();
            let mut chunk = [0u8; 256];
            let n = stream.read(&mut chunk).unwrap();
            decoder.extend(&chunk[..n]);
            loop {
                if decoder.greeting().unwrap().is_some() {
                    break;
                }
                let n = stream.read(&mut chunk).unwrap();
                decoder.extend(&chunk[..n]);
            }
            let mut frames = Vec::new();
            while frames.len() < 2 {
                match decoder.frame().unwrap() {
                    Some(frame) => frames.push(frame),
                    None => {
                        let n = stream.read(&mut chunk).unwrap();
                        decoder.extend(&chunk[..n]);
                    }
                }
            }
            frames.pop().unwrap()
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut client = Connection::handshake(stream, SocketType::Pull, Instant::now() + Duration::from_secs(2))
            .unwrap()
            .unwrap();
        let message = client.recv(Instant::now() + Duration::from_secs(2)).unwrap();
        assert_eq!(message, Some(vec![b"tick".to_vec()]));

        let pong = peer.join().unwrap();
        assert!(pong.command);
        assert_eq!(pong.body, codec::pong(b"hb").body);
    }

    #[test]
    fn closed_peer_is_a_connection_error() {
        let (server, client) = pair(SocketType::Push, SocketType::Pull);
        let server = server.unwrap().unwrap();
        let mut client = client.unwrap().unwrap();
        server.shutdown();
        drop(server);
        let result = client.recv(Instant::now() + Duration::from_secs(2));
        assert!(matches!(result, Err(BridgeError::Connection(_))));
    }
}
