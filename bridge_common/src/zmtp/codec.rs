//! ZMTP 3.0 greeting, frame and command encoding.
//!
//! Wire layout (NULL mechanism only):
//! - greeting: 64 bytes, `0xFF` + 8 padding + `0x7F`, version, mechanism name
//!   padded to 20 bytes, as-server flag, 31 filler bytes;
//! - frame: flags byte, size (1 byte, or 8 bytes big-endian with `LONG`), body;
//! - command frame body: name length, name, command data.
//!
//! Decoding is incremental: `Decoder` keeps whatever bytes have arrived and
//! only consumes them once a complete unit is available.
use strum_macros::{Display, EnumString};

use crate::error::BridgeError;
use crate::result::Result;

/// Size of the greeting each side sends first.
pub const GREETING_LEN: usize = 64;
/// Another frame of the same message follows.
pub const FLAG_MORE: u8 = 0x01;
/// The size field is 8 bytes instead of 1.
pub const FLAG_LONG: u8 = 0x02;
/// The frame carries a command, not message data.
pub const FLAG_COMMAND: u8 = 0x04;
const FLAG_RESERVED: u8 = !(FLAG_MORE | FLAG_LONG | FLAG_COMMAND);

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_SIZE: u64 = 1 << 30;

const MECHANISM_NULL: &[u8] = b"NULL";
const VERSION_MAJOR: u8 = 3;
const VERSION_MINOR: u8 = 0;
const READY: &str = "READY";
const ERROR: &str = "ERROR";
const PING: &str = "PING";
const PONG: &str = "PONG";
/// Longest ping context a peer may send.
const MAX_PING_CONTEXT: usize = 16;
const SOCKET_TYPE: &str = "Socket-Type";

/// ZeroMQ socket types spoken on the bridge endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SocketType {
    /// Sends requests and waits for one reply each.
    Req,
    /// Answers requests.
    Rep,
    /// Sends a one-way stream.
    Push,
    /// Receives a one-way stream.
    Pull,
}

impl SocketType {
    /// Whether a peer of type `peer` may talk to this socket.
    pub fn accepts(self, peer: SocketType) -> bool {
        matches!(
            (self, peer),
            (SocketType::Req, SocketType::Rep)
                | (SocketType::Rep, SocketType::Req)
                | (SocketType::Push, SocketType::Pull)
                | (SocketType::Pull, SocketType::Push)
        )
    }
}

/// The 64-byte greeting announcing ZMTP 3.0 with the NULL mechanism.
pub fn greeting() -> [u8; GREETING_LEN] {
    let mut bytes = [0u8; GREETING_LEN];
    bytes[0] = 0xFF;
    bytes[9] = 0x7F;
    bytes[10] = VERSION_MAJOR;
    bytes[11] = VERSION_MINOR;
    bytes[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    bytes
}

/// Protocol version announced by the peer's greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Greeting {
    /// Major protocol version.
    pub major: u8,
    /// Minor protocol version.
    pub minor: u8,
}

fn parse_greeting(bytes: &[u8]) -> Result<Greeting> {
    if bytes[0] != 0xFF || bytes[9] & 0x01 != 0x01 {
        return Err(BridgeError::Protocol(String::from("invalid greeting signature")));
    }
    let greeting = Greeting {
        major: bytes[10],
        minor: bytes[11],
    };
    if greeting.major < VERSION_MAJOR {
        return Err(BridgeError::Protocol(format!(
            "unsupported ZMTP version {}.{}",
            greeting.major, greeting.minor
        )));
    }
    let mechanism = &bytes[12..32];
    let name_len = mechanism.iter().position(|b| *b == 0).unwrap_or(mechanism.len());
    if &mechanism[..name_len] != MECHANISM_NULL {
        return Err(BridgeError::Protocol(format!(
            "unsupported security mechanism {}",
            String::from_utf8_lossy(&mechanism[..name_len])
        )));
    }
    Ok(greeting)
}

/// One ZMTP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Another frame of the same message follows.
    pub more: bool,
    /// Command frame rather than message data.
    pub command: bool,
    /// Frame payload.
    pub body: Vec<u8>,
}

impl Frame {
    /// Message frame; `more` marks that another part follows.
    pub fn message(body: &[u8], more: bool) -> Self {
        Frame {
            more,
            command: false,
            body: body.to_vec(),
        }
    }

    /// Appends the encoded frame to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        if self.more {
            flags |= FLAG_MORE;
        }
        if self.command {
            flags |= FLAG_COMMAND;
        }
        let len = self.body.len();
        if len > u8::MAX as usize {
            out.push(flags | FLAG_LONG);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        } else {
            out.push(flags);
            out.push(len as u8);
        }
        out.extend_from_slice(&self.body);
    }
}

/// Encodes a multipart message; every part but the last carries `MORE`.
pub fn encode_message(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len() + 9).sum());
    for (index, part) in parts.iter().enumerate() {
        Frame::message(part, index + 1 < parts.len()).encode(&mut out);
    }
    out
}

/// Commands exchanged after the greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Handshake completion, with the sender's socket type if announced.
    Ready {
        /// Value of the `Socket-Type` property.
        socket_type: Option<String>,
    },
    /// Fatal error reported by the peer.
    Error {
        /// Reason text sent by the peer.
        reason: String,
    },
    /// Heartbeat that must be answered with a `PONG` echoing `context`.
    Ping {
        /// Opaque bytes to echo back, at most 16.
        context: Vec<u8>,
    },
    /// Any other command; ignored.
    Other {
        /// Command name.
        name: String,
    },
}

fn command(name: &str, data: &[u8]) -> Frame {
    let mut body = Vec::with_capacity(1 + name.len() + data.len());
    body.push(name.len() as u8);
    body.extend_from_slice(name.as_bytes());
    body.extend_from_slice(data);
    Frame {
        more: false,
        command: true,
        body,
    }
}

/// Encoded `READY` command frame announcing `socket_type`.
pub fn ready(socket_type: SocketType) -> Frame {
    let mut body = Vec::new();
    body.push(READY.len() as u8);
    body.extend_from_slice(READY.as_bytes());
    let value = socket_type.to_string();
    body.push(SOCKET_TYPE.len() as u8);
    body.extend_from_slice(SOCKET_TYPE.as_bytes());
    body.extend_from_slice(&(value.len() as u32).to_be_bytes());
    body.extend_from_slice(value.as_bytes());
    Frame {
        more: false,
        command: true,
        body,
    }
}

/// Encoded `ERROR` command frame.
pub fn error(reason: &str) -> Frame {
    let reason = &reason.as_bytes()[..reason.len().min(u8::MAX as usize)];
    let mut data = Vec::with_capacity(reason.len() + 1);
    data.push(reason.len() as u8);
    data.extend_from_slice(reason);
    command(ERROR, &data)
}

/// Encoded `PING` command frame. `ttl` is in tenths of a second.
pub fn ping(ttl: u16, context: &[u8]) -> Frame {
    let context = &context[..context.len().min(MAX_PING_CONTEXT)];
    let mut data = ttl.to_be_bytes().to_vec();
    data.extend_from_slice(context);
    command(PING, &data)
}

/// Encoded `PONG` command frame answering a ping with `context`.
pub fn pong(context: &[u8]) -> Frame {
    command(PONG, &context[..context.len().min(MAX_PING_CONTEXT)])
}

fn truncated(what: &str) -> BridgeError {
    BridgeError::Protocol(format!("truncated {}", what))
}

/// Decodes the body of a command frame.
pub fn parse_command(body: &[u8]) -> Result<Command> {
    let (&name_len, rest) = body.split_first().ok_or_else(|| truncated("command"))?;
    let name_len = name_len as usize;
    if rest.len() < name_len {
        return Err(truncated("command name"));
    }
    let name = String::from_utf8_lossy(&rest[..name_len]).into_owned();
    let mut data = &rest[name_len..];
    match name.as_str() {
        READY => {
            let mut socket_type = None;
            while !data.is_empty() {
                let key_len = data[0] as usize;
                if data.len() < 1 + key_len + 4 {
                    return Err(truncated("READY property"));
                }
                let key = &data[1..1 + key_len];
                let mut size = [0u8; 4];
                size.copy_from_slice(&data[1 + key_len..5 + key_len]);
                let value_len = u32::from_be_bytes(size) as usize;
                let start = 5 + key_len;
                if data.len() < start + value_len {
                    return Err(truncated("READY property value"));
                }
                if key.eq_ignore_ascii_case(SOCKET_TYPE.as_bytes()) {
                    socket_type =
                        Some(String::from_utf8_lossy(&data[start..start + value_len]).into_owned());
                }
                data = &data[start + value_len..];
            }
            Ok(Command::Ready { socket_type })
        }
        ERROR => {
            let reason = match data.split_first() {
                Some((&len, text)) => {
                    String::from_utf8_lossy(&text[..(len as usize).min(text.len())]).into_owned()
                }
                None => String::new(),
            };
            Ok(Command::Error { reason })
        }
        PING => {
            if data.len() < 2 {
                return Err(truncated("PING"));
            }
            let context = &data[2..];
            Ok(Command::Ping {
                context: context[..context.len().min(MAX_PING_CONTEXT)].to_vec(),
            })
        }
        _ => Ok(Command::Other { name }),
    }
}

/// Incremental decoder over the bytes received from one peer.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
    parts: Vec<Vec<u8>>,
    /// Contexts of pings seen by `message` and not answered yet.
    pings: Vec<Vec<u8>>,
}

impl Decoder {
    /// Empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Consumes the peer greeting once 64 bytes are available.
    pub fn greeting(&mut self) -> Result<Option<Greeting>> {
        if self.buf.len() < GREETING_LEN {
            // The signature can be checked before the rest arrives.
            if !self.buf.is_empty() && self.buf[0] != 0xFF {
                return Err(BridgeError::Protocol(String::from("invalid greeting signature")));
            }
            return Ok(None);
        }
        let greeting = parse_greeting(&self.buf[..GREETING_LEN])?;
        self.buf.drain(..GREETING_LEN);
        Ok(Some(greeting))
    }

    /// Consumes the next complete frame.
    pub fn frame(&mut self) -> Result<Option<Frame>> {
        let Some(&flags) = self.buf.first() else {
            return Ok(None);
        };
        if flags & FLAG_RESERVED != 0 {
            return Err(BridgeError::Protocol(format!("invalid frame flags {:#04x}", flags)));
        }
        let (header, size) = if flags & FLAG_LONG != 0 {
            if self.buf.len() < 9 {
                return Ok(None);
            }
            let mut size = [0u8; 8];
            size.copy_from_slice(&self.buf[1..9]);
            (9, u64::from_be_bytes(size))
        } else {
            if self.buf.len() < 2 {
                return Ok(None);
            }
            (2, self.buf[1] as u64)
        };
        if size > MAX_FRAME_SIZE {
            return Err(BridgeError::Protocol(format!("frame of {} bytes is too large", size)));
        }
        let end = header + size as usize;
        if self.buf.len() < end {
            return Ok(None);
        }
        let body = self.buf[header..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(Frame {
            more: flags & FLAG_MORE != 0,
            command: flags & FLAG_COMMAND != 0,
            body,
        }))
    }

    /// Consumes the next complete multipart message, skipping command frames.
    ///
    /// Pings met on the way are remembered for `take_pings`.
    pub fn message(&mut self) -> Result<Option<Vec<Vec<u8>>>> {
        while let Some(frame) = self.frame()? {
            if frame.command {
                match parse_command(&frame.body)? {
                    Command::Error { reason } => {
                        return Err(BridgeError::Protocol(format!("peer sent ERROR: {}", reason)));
                    }
                    Command::Ping { context } => self.pings.push(context),
                    _ => {}
                }
                continue;
            }
            self.parts.push(frame.body);
            if !frame.more {
                return Ok(Some(std::mem::take(&mut self.parts)));
            }
        }
        Ok(None)
    }

    /// Ping contexts that still need a `PONG`, oldest first.
    pub fn take_pings(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.pings)
    }
}
