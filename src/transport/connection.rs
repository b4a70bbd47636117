//! WebSocket connection and event loop.
//!
//! This module implements [`Connector`] over `tokio-tungstenite`, speaking
//! the Socket.IO handshake with the WebSocket transport forced.
//!
//! # Event Loop
//!
//! Each opened transport spawns a tokio task that handles:
//!
//! - Dialing the endpoint within the connect timeout
//! - The open → CONNECT → CONNECT ack handshake
//! - Answering engine pings and tracking server liveness
//! - Forwarding `message` events to the owner in arrival order
//! - Outgoing emits from the owner

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Packet;

use super::{Connector, EventSender, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Default time allowed for dialing plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Name of the event that carries application messages.
const MESSAGE_EVENT: &str = "message";

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

/// Internal commands for the event loop.
enum TransportCommand {
    /// Send a packet.
    Emit(Packet),
    /// Close the socket.
    Shutdown,
}

/// Why the event loop stopped.
enum Exit {
    /// The owner asked for it; report nothing.
    Requested,
    /// The link failed; report a terminal event.
    Failed(String),
}

// ============================================================================
// SocketIoConnector
// ============================================================================

/// Opens Socket.IO transports over WebSocket.
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    /// Time allowed for dialing plus handshake.
    connect_timeout: Duration,
}

impl Default for SocketIoConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl SocketIoConnector {
    /// Creates a connector with the given handshake timeout.
    #[inline]
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Returns the handshake timeout.
    #[inline]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Connector for SocketIoConnector {
    fn open(&self, endpoint: &Url, auth: Option<Value>, events: EventSender) -> Box<dyn Transport> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_event_loop(
            endpoint.clone(),
            auth,
            self.connect_timeout,
            command_rx,
            events,
        ));

        Box::new(SocketIoTransport { command_tx })
    }
}

// ============================================================================
// SocketIoTransport
// ============================================================================

/// Handle to a transport opened by [`SocketIoConnector`].
///
/// Dropping the handle closes the socket.
pub struct SocketIoTransport {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<TransportCommand>,
}

impl Transport for SocketIoTransport {
    fn emit(&self, event: &str, payload: Option<Value>) -> Result<()> {
        self.command_tx
            .send(TransportCommand::Emit(Packet::event(event, payload)))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn disconnect(&self) {
        let _ = self.command_tx.send(TransportCommand::Shutdown);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Dials, performs the handshake, then pumps frames until the link ends.
async fn run_event_loop(
    endpoint: Url,
    auth: Option<Value>,
    connect_timeout: Duration,
    mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
    events: EventSender,
) {
    let ws_stream = match dial(&endpoint, connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%endpoint, error = %e, "Dial failed");
            let _ = events.send(TransportEvent::ConnectError(e.to_string()));
            return;
        }
    };

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let handshake_deadline = Instant::now() + connect_timeout;
    let mut connected = false;
    let mut liveness: Option<Duration> = None;
    let mut last_seen = Instant::now();

    let exit = loop {
        let silence_deadline = last_seen + liveness.unwrap_or(connect_timeout);

        tokio::select! {
            // Incoming frames from the server
            message = ws_read.next() => {
                last_seen = Instant::now();
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match handle_frame(&text, &auth, &events, &mut ws_write).await {
                            Ok(FrameOutcome::Continue) => {}
                            Ok(FrameOutcome::Opened(window)) => liveness = Some(window),
                            Ok(FrameOutcome::Connected) => {
                                connected = true;
                                info!(%endpoint, "Socket connected");
                                let _ = events.send(TransportEvent::Connect);
                            }
                            Ok(FrameOutcome::Closed(reason)) => break Exit::Failed(reason),
                            Err(e) if e.is_connection_error() => {
                                warn!(error = %e, "Link failed while answering frame");
                                break Exit::Failed(e.to_string());
                            }
                            Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break Exit::Failed("closed by remote".to_owned());
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break Exit::Failed(e.to_string());
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break Exit::Failed("stream ended".to_owned());
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            // Commands from the owner
            command = command_rx.recv() => {
                match command {
                    Some(TransportCommand::Emit(packet)) => {
                        if let Err(e) = send_packet(&mut ws_write, &packet).await {
                            warn!(error = %e, "Failed to emit packet");
                        }
                    }

                    Some(TransportCommand::Shutdown) | None => {
                        debug!("Shutdown requested");
                        let _ = send_packet(&mut ws_write, &Packet::Disconnect).await;
                        let _ = ws_write.close().await;
                        break Exit::Requested;
                    }
                }
            }

            // Handshake must finish in time
            () = sleep_until(handshake_deadline), if !connected => {
                break Exit::Failed(Error::connection_timeout(connect_timeout).to_string());
            }

            // Server went silent past its own ping schedule
            () = sleep_until(silence_deadline), if connected => {
                warn!(?liveness, "No frames from server, treating link as dead");
                break Exit::Failed("ping timeout".to_owned());
            }
        }
    };

    if let Exit::Failed(reason) = exit {
        let event = if connected {
            TransportEvent::Disconnect(reason)
        } else {
            TransportEvent::ConnectError(reason)
        };
        let _ = events.send(event);
    }

    debug!("Transport event loop terminated");
}

/// Opens the WebSocket within the timeout.
async fn dial(endpoint: &Url, connect_timeout: Duration) -> Result<WsStream> {
    let (ws_stream, _response) = timeout(connect_timeout, connect_async(endpoint.as_str()))
        .await
        .map_err(|_| Error::connection_timeout(connect_timeout))?
        .map_err(|e| Error::connection(format!("{endpoint}: {e}")))?;

    debug!(%endpoint, "WebSocket opened");
    Ok(ws_stream)
}

/// What a decoded frame means for the loop.
enum FrameOutcome {
    Continue,
    Opened(Duration),
    Connected,
    Closed(String),
}

/// Handles one text frame from the server.
async fn handle_frame(
    text: &str,
    auth: &Option<Value>,
    events: &EventSender,
    ws_write: &mut WsSink,
) -> Result<FrameOutcome> {
    match Packet::decode(text)? {
        Packet::Open(handshake) => {
            debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Engine open");
            send_packet(ws_write, &Packet::Connect(auth.clone())).await?;
            Ok(FrameOutcome::Opened(handshake.liveness_window()))
        }

        Packet::Ping => {
            send_packet(ws_write, &Packet::Pong).await?;
            Ok(FrameOutcome::Continue)
        }

        Packet::Connect(_) => Ok(FrameOutcome::Connected),

        Packet::ConnectError(reason) => Ok(FrameOutcome::Closed(describe(&reason))),

        Packet::Disconnect => Ok(FrameOutcome::Closed("server disconnect".to_owned())),

        Packet::Close => Ok(FrameOutcome::Closed("engine close".to_owned())),

        Packet::Event { name, args } if name == MESSAGE_EVENT => {
            for payload in args {
                let _ = events.send(TransportEvent::Message(payload));
            }
            Ok(FrameOutcome::Continue)
        }

        Packet::Event { name, .. } => {
            trace!(event = %name, "Ignoring event");
            Ok(FrameOutcome::Continue)
        }

        Packet::Pong | Packet::Noop => Ok(FrameOutcome::Continue),
    }
}

/// Encodes and writes a packet.
async fn send_packet(ws_write: &mut WsSink, packet: &Packet) -> Result<()> {
    ws_write.send(Message::Text(packet.encode().into())).await?;
    trace!(?packet, "Packet sent");
    Ok(())
}

/// Extracts a readable reason from a CONNECT_ERROR payload.
fn describe(reason: &Value) -> String {
    reason
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| reason.to_string(), str::to_owned)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerStream = WebSocketStream<TcpStream>;

    const OPEN_FRAME: &str =
        r#"0{"sid":"eng1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

    async fn bind() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("local addr").port();
        let url = Url::parse(&format!(
            "ws://127.0.0.1:{port}/socket.io/?EIO=4&transport=websocket"
        ))
        .expect("valid url");
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerStream {
        let (stream, _) = listener.accept().await.expect("accept");
        accept_async(stream).await.expect("upgrade")
    }

    async fn send_text(ws: &mut ServerStream, text: &str) {
        ws.send(Message::Text(text.to_owned().into()))
            .await
            .expect("server send");
    }

    async fn next_packet(ws: &mut ServerStream) -> Packet {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Packet::decode(text.as_str()).expect("client frames decode");
                }
                Some(Ok(_)) => continue,
                other => panic!("Expected a text frame, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_default_connect_timeout() {
        let connector = SocketIoConnector::default();
        assert_eq!(connector.connect_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_describe_connect_error() {
        assert_eq!(describe(&json!({ "message": "unauthorized" })), "unauthorized");
        assert_eq!(describe(&json!("nope")), "\"nope\"");
    }

    #[tokio::test]
    async fn test_handshake_messages_and_remote_close() {
        let (listener, url) = bind().await;

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            send_text(&mut ws, OPEN_FRAME).await;

            let connect = next_packet(&mut ws).await;
            assert_eq!(connect, Packet::Connect(Some(json!({ "user_id": "u1" }))));
            send_text(&mut ws, r#"40{"sid":"s1"}"#).await;

            send_text(&mut ws, "2").await;
            assert_eq!(next_packet(&mut ws).await, Packet::Pong);

            send_text(&mut ws, r#"42["message",{"type":"chunk","task_id":"A1"}]"#).await;
            send_text(&mut ws, r#"42["other",{"type":"chunk"}]"#).await;
            send_text(&mut ws, r#"42["message",{"type":"result","task_id":"A1"}]"#).await;

            let emitted = next_packet(&mut ws).await;
            assert_eq!(
                emitted,
                Packet::event("message", Some(json!({ "type": "create", "query": "hi" })))
            );

            ws.close(None).await.expect("close");
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport =
            SocketIoConnector::default().open(&url, Some(json!({ "user_id": "u1" })), events_tx);

        assert_eq!(events_rx.recv().await, Some(TransportEvent::Connect));

        let Some(TransportEvent::Message(first)) = events_rx.recv().await else {
            panic!("Expected first message");
        };
        assert_eq!(first["type"], "chunk");

        let Some(TransportEvent::Message(second)) = events_rx.recv().await else {
            panic!("Expected second message");
        };
        assert_eq!(second["type"], "result");

        transport
            .emit("message", Some(json!({ "type": "create", "query": "hi" })))
            .expect("emit while open");

        assert!(matches!(
            events_rx.recv().await,
            Some(TransportEvent::Disconnect(_))
        ));

        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_connect_error_packet() {
        let (listener, url) = bind().await;

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            send_text(&mut ws, OPEN_FRAME).await;
            let _ = next_packet(&mut ws).await;
            send_text(&mut ws, r#"44{"message":"unauthorized"}"#).await;
            let _ = ws.next().await;
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _transport = SocketIoConnector::default().open(&url, None, events_tx);

        assert_eq!(
            events_rx.recv().await,
            Some(TransportEvent::ConnectError("unauthorized".to_owned()))
        );

        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_refused_dial_is_connect_error() {
        let (listener, url) = bind().await;
        drop(listener);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _transport = SocketIoConnector::default().open(&url, None, events_tx);

        let Some(TransportEvent::ConnectError(reason)) = events_rx.recv().await else {
            panic!("Expected connect error");
        };
        assert!(reason.starts_with("Connection failed"), "{reason}");
    }

    #[tokio::test]
    async fn test_dial_failure_is_connection_error() {
        let (listener, url) = bind().await;
        drop(listener);

        let err = dial(&url, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_silent_server_is_disconnected() {
        let (listener, url) = bind().await;

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            send_text(
                &mut ws,
                r#"0{"sid":"eng1","upgrades":[],"pingInterval":100,"pingTimeout":100}"#,
            )
            .await;
            let _ = next_packet(&mut ws).await;
            send_text(&mut ws, r#"40{"sid":"s1"}"#).await;
            // No pings from here on
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _transport = SocketIoConnector::default().open(&url, None, events_tx);

        assert_eq!(events_rx.recv().await, Some(TransportEvent::Connect));

        let started = Instant::now();
        let event = timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("liveness deadline should fire");
        assert_eq!(
            event,
            Some(TransportEvent::Disconnect("ping timeout".to_owned()))
        );
        assert!(started.elapsed() < Duration::from_secs(2));

        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_missing_connect_ack_times_out() {
        let (listener, url) = bind().await;

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            send_text(&mut ws, OPEN_FRAME).await;
            // Never acknowledge the namespace connect
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = SocketIoConnector::new(Duration::from_millis(200)).open(&url, None, events_tx);

        let Some(TransportEvent::ConnectError(reason)) = events_rx.recv().await else {
            panic!("Expected connect error");
        };
        assert!(reason.contains("timeout"), "{reason}");

        drop(transport);
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_disconnect_reports_nothing() {
        let (listener, url) = bind().await;

        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            send_text(&mut ws, OPEN_FRAME).await;
            let _ = next_packet(&mut ws).await;
            send_text(&mut ws, r#"40{"sid":"s1"}"#).await;
            assert_eq!(next_packet(&mut ws).await, Packet::Disconnect);
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = SocketIoConnector::default().open(&url, None, events_tx);

        assert_eq!(events_rx.recv().await, Some(TransportEvent::Connect));
        transport.disconnect();

        // The loop ends and drops its sender without a terminal event.
        assert_eq!(events_rx.recv().await, None);

        server.await.expect("server task");
    }
}
