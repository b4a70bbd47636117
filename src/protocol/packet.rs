//! Wire framing for the streaming transport.
//!
//! The backend speaks Socket.IO v5 over Engine.IO v4, and the client forces
//! the WebSocket transport, so every frame is one text packet:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `0{..}` | Engine open, carries the [`Handshake`] |
//! | `1` | Engine close |
//! | `2` / `3` | Engine ping / pong |
//! | `40` / `40{..}` | Namespace connect (client auth or server ack) |
//! | `41` | Namespace disconnect |
//! | `42["name",..]` | Event |
//! | `44{..}` | Namespace connect refused |
//!
//! Only the default namespace is used. A `/namespace,` prefix and ack ids
//! are skipped on decode; binary and ack packets are rejected.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, from_str};

use crate::error::{Error, Result};

// ============================================================================
// Handshake
// ============================================================================

/// Parameters announced by the server in the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine session ID.
    pub sid: String,

    /// Transports the server would upgrade to (unused, websocket is forced).
    #[serde(default)]
    pub upgrades: Vec<String>,

    /// Interval between server pings, in milliseconds.
    pub ping_interval: u64,

    /// Grace period after a missed ping, in milliseconds.
    pub ping_timeout: u64,

    /// Maximum payload size accepted by the server.
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// Returns how long the link may stay silent before it is considered dead.
    #[inline]
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

// ============================================================================
// Packet
// ============================================================================

/// A decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine session opened.
    Open(Handshake),
    /// Engine session closed.
    Close,
    /// Engine liveness probe.
    Ping,
    /// Answer to [`Packet::Ping`].
    Pong,
    /// Namespace connect. Client side carries auth, server side carries the sid.
    Connect(Option<Value>),
    /// Namespace disconnect.
    Disconnect,
    /// Named event with its arguments.
    Event {
        /// Event name.
        name: String,
        /// Event arguments, in order.
        args: Vec<Value>,
    },
    /// Namespace connect refused by the server.
    ConnectError(Value),
    /// Engine upgrade or noop, carries nothing.
    Noop,
}

impl Packet {
    /// Creates an event packet with a single optional payload.
    #[must_use]
    pub fn event(name: impl Into<String>, payload: Option<Value>) -> Self {
        Self::Event {
            name: name.into(),
            args: payload.into_iter().collect(),
        }
    }

    /// Encodes the packet as a text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => format!(
                "0{{\"sid\":{},\"upgrades\":[],\"pingInterval\":{},\"pingTimeout\":{}}}",
                Value::String(handshake.sid.clone()),
                handshake.ping_interval,
                handshake.ping_timeout
            ),
            Self::Close => "1".to_owned(),
            Self::Ping => "2".to_owned(),
            Self::Pong => "3".to_owned(),
            Self::Connect(None) => "40".to_owned(),
            Self::Connect(Some(auth)) => format!("40{auth}"),
            Self::Disconnect => "41".to_owned(),
            Self::Event { name, args } => {
                let mut frame = Vec::with_capacity(args.len() + 1);
                frame.push(Value::String(name.clone()));
                frame.extend(args.iter().cloned());
                format!("42{}", Value::Array(frame))
            }
            Self::ConnectError(reason) => format!("44{reason}"),
            Self::Noop => "6".to_owned(),
        }
    }

    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] for empty frames and unknown or unsupported packet types
    /// - [`Error::Json`] if the packet body is not valid JSON
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::protocol("empty engine packet"))?;
        let body = chars.as_str();

        match kind {
            '0' => Ok(Self::Open(from_str(body)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => Self::decode_socket(body),
            '5' | '6' => Ok(Self::Noop),
            other => Err(Error::protocol(format!(
                "unknown engine packet type '{other}'"
            ))),
        }
    }

    /// Decodes the Socket.IO packet carried by an engine message.
    fn decode_socket(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::protocol("empty socket packet"))?;
        let body = strip_namespace(chars.as_str()).trim_start_matches(|c: char| c.is_ascii_digit());

        match kind {
            '0' if body.is_empty() => Ok(Self::Connect(None)),
            '0' => Ok(Self::Connect(Some(from_str(body)?))),
            '1' => Ok(Self::Disconnect),
            '2' => {
                let mut args: Vec<Value> = from_str(body)?;
                if args.is_empty() {
                    return Err(Error::protocol("event packet without a name"));
                }
                match args.remove(0) {
                    Value::String(name) => Ok(Self::Event { name, args }),
                    other => Err(Error::protocol(format!("event name is not a string: {other}"))),
                }
            }
            '4' if body.is_empty() => Ok(Self::ConnectError(Value::Null)),
            '4' => Ok(Self::ConnectError(from_str(body)?)),
            '3' | '5' | '6' => Err(Error::protocol(format!(
                "unsupported socket packet type '{kind}'"
            ))),
            other => Err(Error::protocol(format!(
                "unknown socket packet type '{other}'"
            ))),
        }
    }
}

/// Skips a `/namespace,` prefix if present.
fn strip_namespace(text: &str) -> &str {
    if !text.starts_with('/') {
        return text;
    }
    text.split_once(',').map_or("", |(_, rest)| rest)
}

// ============================================================================
// Tests
// ============================================================================
