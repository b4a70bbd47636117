//! Channel transport layer.
//!
//! This module defines the contract between the channel manager and the
//! real-time socket underneath it, plus the WebSocket implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  TaskChannel    │                              │  Task backend   │
//! │                 │     WebSocket (forced)       │                 │
//! │  Connector      │─────────────────────────────►│  Socket.IO      │
//! │  → Transport    │  /socket.io/?EIO=4&          │  server         │
//! │  ← events       │◄─────────────────────────────│                 │
//! └─────────────────┘   transport=websocket        └─────────────────┘
//! ```
//!
//! # Contract
//!
//! 1. [`Connector::open`] returns a [`Transport`] immediately; nothing blocks
//! 2. Progress arrives later as [`TransportEvent`]s on the supplied sender
//! 3. Exactly one terminal event (`ConnectError` or `Disconnect`) is sent,
//!    unless the transport was closed through [`Transport::disconnect`]
//! 4. A transport never reconnects by itself
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket event loop |

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{SocketIoConnector, SocketIoTransport};

// ============================================================================
// Constants
// ============================================================================

/// Engine.IO protocol revision spoken by the backend.
const ENGINE_PROTOCOL: &str = "4";

// ============================================================================
// TransportEvent
// ============================================================================

/// Events a transport reports to its owner, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake completed, the channel is live.
    Connect,
    /// The channel failed to establish.
    ConnectError(String),
    /// An established channel dropped.
    Disconnect(String),
    /// Payload of a server `message` event.
    Message(Value),
}

/// Sending half handed to a transport for its events.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

// ============================================================================
// Traits
// ============================================================================

/// A live (or establishing) socket.
pub trait Transport: Send + Sync {
    /// Emits a named event with an optional payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket is gone.
    fn emit(&self, event: &str, payload: Option<Value>) -> Result<()>;

    /// Closes the socket. No further events are reported.
    fn disconnect(&self);
}

/// Opens transports.
pub trait Connector: Send + Sync + 'static {
    /// Starts opening a socket to `endpoint` and returns its handle at once.
    ///
    /// `auth` is presented to the server during the handshake.
    fn open(&self, endpoint: &Url, auth: Option<Value>, events: EventSender) -> Box<dyn Transport>;
}

// ============================================================================
// Endpoint
// ============================================================================

/// Derives the WebSocket endpoint from a server origin.
///
/// `http` maps to `ws` and `https` to `wss`; the path is replaced and the
/// query pins the protocol revision and the websocket transport.
///
/// # Errors
///
/// Returns [`Error::Config`] if the origin scheme is not http(s) or ws(s).
pub fn endpoint_url(origin: &Url, path: &str) -> Result<Url> {
    let scheme = match origin.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::config(format!(
                "unsupported origin scheme `{other}`, expected http, https, ws or wss"
            )));
        }
    };

    let mut url = origin.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("cannot use scheme `{scheme}` for {origin}")))?;
    url.set_path(path);
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", ENGINE_PROTOCOL)
        .append_pair("transport", "websocket");

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================
