//! Channel manager and connection state machine.
//!
//! # State Machine
//!
//! ```text
//!              connect()                  transport "connect"
//! Disconnected ─────────► Connecting ───────────────────────► Connected
//!      ▲                      │                                   │
//!      │   connect_error      │          error / disconnect       │
//!      └──────────────────────┴───────────────────────────────────┘
//!                 (reconnect timer armed, fires connect())
//! ```
//!
//! `close_socket()` returns to `Disconnected` from any state and cancels
//! the reconnect timer. The instance can be connected again afterwards.
//!
//! # Threading
//!
//! All mutable state (transport handle, status, active task, timers) lives
//! in one struct behind one mutex. The lock is never held across `.await`
//! or while the application callback runs.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::TaskId;
use crate::protocol::{CancelTask, CreateTask, InboundMessage, OutboundMessage};
use crate::transport::{Connector, Transport, TransportEvent};

use super::builder::ChannelBuilder;
use super::correlator::TaskCorrelator;
use super::heartbeat::Heartbeat;
use super::options::{ChannelOptions, UserInfo};
use super::router::{Dispatch, route_payload};

// ============================================================================
// Constants
// ============================================================================

/// Event carrying application messages in both directions.
const MESSAGE_EVENT: &str = "message";

/// Keepalive event, sent without payload.
const PING_EVENT: &str = "ping";

// ============================================================================
// Types
// ============================================================================

/// Application callback for deliverable messages.
///
/// Invoked on the channel's event task, in transport delivery order.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Connection status of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No live channel.
    #[default]
    Disconnected,
    /// A transport exists and is handshaking.
    Connecting,
    /// The channel is live.
    Connected,
}

impl ConnectionState {
    /// Returns `true` if the channel is live.
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

// ============================================================================
// ChannelState
// ============================================================================

/// A reconnect waiting on its timer.
struct PendingReconnect {
    seq: u64,
    task: JoinHandle<()>,
}

/// Everything a channel mutates.
struct ChannelState {
    /// The single transport handle.
    transport: Option<Box<dyn Transport>>,
    /// Current status.
    status: ConnectionState,
    /// Bumped whenever the transport changes; older events are ignored.
    generation: u64,
    /// Keepalive timer, armed iff `Connected`.
    heartbeat: Heartbeat,
    /// Armed reconnect timer.
    reconnect: Option<PendingReconnect>,
    /// Identifies reconnect timers.
    reconnect_seq: u64,
    /// Failures since the last successful connect.
    attempts: u32,
    /// Active task.
    correlator: TaskCorrelator,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            transport: None,
            status: ConnectionState::Disconnected,
            generation: 0,
            heartbeat: Heartbeat::default(),
            reconnect: None,
            reconnect_seq: 0,
            attempts: 0,
            correlator: TaskCorrelator::new(),
        }
    }
}

// ============================================================================
// Inner
// ============================================================================

struct Inner {
    options: ChannelOptions,
    endpoint: Url,
    user_info: UserInfo,
    handler: MessageHandler,
    connector: Arc<dyn Connector>,
    state: Mutex<ChannelState>,
    status_tx: watch::Sender<ConnectionState>,
}

// ============================================================================
// TaskChannel
// ============================================================================

/// Self-healing channel to the task backend.
///
/// Cloning is cheap and yields another handle to the same channel. The
/// channel is torn down when the last handle is dropped.
///
/// # Example
///
/// ```no_run
/// use task_channel::{InboundMessage, TaskChannel, UserInfo};
///
/// # async fn example() -> task_channel::Result<()> {
/// let channel = TaskChannel::builder()
///     .origin("http://localhost:8000")
///     .user_info(UserInfo::new("u1"))
///     .on_message(|message| {
///         if let InboundMessage::Chunk(chunk) = message {
///             print!("{}", chunk.content().unwrap_or_default());
///         }
///     })
///     .build()?;
///
/// channel.connect();
/// // ... once connected:
/// channel.create_task("What is a borrow checker?", 1, true)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TaskChannel {
    inner: Arc<Inner>,
}

impl fmt::Debug for TaskChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TaskChannel")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("status", &state.status)
            .field("active_task", &state.correlator.active_task())
            .finish()
    }
}

// ============================================================================
// TaskChannel - Constructors
// ============================================================================

impl TaskChannel {
    /// Creates a builder for configuring a channel.
    #[inline]
    #[must_use]
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    /// Creates a channel to the default origin with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the defaults fail validation.
    pub fn new<F>(user_info: UserInfo, on_message: F) -> Result<Self>
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        ChannelBuilder::new()
            .user_info(user_info)
            .on_message(on_message)
            .build()
    }

    /// Assembles a channel from validated parts.
    pub(crate) fn from_parts(
        options: ChannelOptions,
        endpoint: Url,
        user_info: UserInfo,
        handler: MessageHandler,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                options,
                endpoint,
                user_info,
                handler,
                connector,
                state: Mutex::new(ChannelState::default()),
                status_tx,
            }),
        }
    }
}

// ============================================================================
// TaskChannel - Lifecycle
// ============================================================================

impl TaskChannel {
    /// Opens the transport if none exists.
    ///
    /// Returns immediately; progress is reported through
    /// [`status`](Self::status). A no-op while a transport exists.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Closes the transport and stops every timer.
    ///
    /// No reconnect happens afterwards until [`connect`](Self::connect) is
    /// called again.
    pub fn close_socket(&self) {
        let mut state = self.inner.state.lock();
        if let Some(pending) = state.reconnect.take() {
            pending.task.abort();
        }
        self.inner.teardown(&mut state);
        state.attempts = 0;
        info!(endpoint = %self.inner.endpoint, "Socket closed");
    }
}

// ============================================================================
// TaskChannel - Sending
// ============================================================================

impl TaskChannel {
    /// Sends `{type: kind, ...data}` on the generic message channel.
    ///
    /// Nothing is queued: while the channel is not connected the message is
    /// dropped and [`Error::NotConnected`] is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the channel is not connected
    /// - [`Error::InvalidArgument`] if `data` is not an object or null
    /// - [`Error::ConnectionClosed`] if the socket went away mid-send
    pub fn send_message<T: Serialize + ?Sized>(&self, kind: &str, data: &T) -> Result<()> {
        let message = OutboundMessage::new(kind, data)?;

        let state = self.inner.state.lock();
        let transport = match (&state.transport, state.status) {
            (Some(transport), ConnectionState::Connected) => transport,
            _ => {
                warn!(kind, status = %state.status, "Not connected, message dropped");
                return Err(Error::NotConnected);
            }
        };

        transport.emit(MESSAGE_EVENT, Some(message.to_value()?))?;
        trace!(kind, "Message sent");
        Ok(())
    }

    /// Asks the backend to start a task for this channel's user.
    ///
    /// The task becomes active when the backend answers with its pending
    /// status.
    ///
    /// # Errors
    ///
    /// Same as [`send_message`](Self::send_message).
    pub fn create_task(&self, query: impl Into<String>, model: i64, stream: bool) -> Result<()> {
        let mut request = CreateTask::new(query, model);
        request.stream = stream;
        if let Some(user_id) = &self.inner.user_info.user_id {
            request.user_id.clone_from(user_id);
        }
        self.send_message(CreateTask::KIND, &request)
    }

    /// Asks the backend to cancel a task.
    ///
    /// # Errors
    ///
    /// Same as [`send_message`](Self::send_message).
    pub fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        let request = CancelTask {
            task_id: task_id.clone(),
        };
        self.send_message(CancelTask::KIND, &request)
    }
}

// ============================================================================
// TaskChannel - Accessors
// ============================================================================

impl TaskChannel {
    /// Returns the connection status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.inner.state.lock().status
    }

    /// Returns `true` if the channel is live.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Returns a receiver that observes every status transition.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    /// Returns the task whose chunks and results are being delivered.
    #[must_use]
    pub fn active_task(&self) -> Option<TaskId> {
        self.inner.state.lock().correlator.active_task().cloned()
    }

    /// Returns the identity presented on connect.
    #[inline]
    #[must_use]
    pub fn user_info(&self) -> &UserInfo {
        &self.inner.user_info
    }

    /// Returns the channel configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ChannelOptions {
        &self.inner.options
    }

    /// Returns the WebSocket endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }
}

// ============================================================================
// Inner - State Machine
// ============================================================================

impl Inner {
    fn connect(self: &Arc<Self>) {
        let mut state = self.state.lock();
        let opened = self.open_locked(&mut state);
        drop(state);

        if let Some((generation, events)) = opened {
            self.spawn_pump(generation, events);
        }
    }

    /// Opens a transport unless one exists. The caller holds the state lock
    /// from its own checks through this call.
    fn open_locked(
        &self,
        state: &mut ChannelState,
    ) -> Option<(u64, mpsc::UnboundedReceiver<TransportEvent>)> {
        if state.transport.is_some() {
            trace!("Transport exists, connect ignored");
            return None;
        }
        if let Some(pending) = state.reconnect.take() {
            pending.task.abort();
        }

        state.generation += 1;
        let generation = state.generation;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self
            .connector
            .open(&self.endpoint, self.user_info.auth_payload(), events_tx);
        state.transport = Some(transport);
        self.set_status(state, ConnectionState::Connecting);

        info!(endpoint = %self.endpoint, generation, "Connecting");
        Some((generation, events_rx))
    }

    fn spawn_pump(self: &Arc<Self>, generation: u64, events: mpsc::UnboundedReceiver<TransportEvent>) {
        tokio::spawn(pump_events(Arc::downgrade(self), generation, events));
    }

    /// Applies one transport event. Returns `false` once the transport is
    /// no longer current.
    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connect => self.on_connect(generation),
            TransportEvent::ConnectError(reason) => {
                warn!(generation, %reason, "Connect error");
                self.fail(generation)
            }
            TransportEvent::Disconnect(reason) => {
                warn!(generation, %reason, "Disconnected");
                self.fail(generation)
            }
            TransportEvent::Message(payload) => self.on_message(generation, &payload),
        }
    }

    fn on_connect(self: &Arc<Self>, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }

        state.attempts = 0;
        self.set_status(&mut state, ConnectionState::Connected);
        self.start_ping(&mut state);
        info!(endpoint = %self.endpoint, "Channel connected");
        true
    }

    fn on_message(self: &Arc<Self>, generation: u64, payload: &Value) -> bool {
        let dispatch = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            route_payload(payload, &mut state.correlator)
        };

        match dispatch {
            Dispatch::Deliver(message) => {
                trace!(kind = message.kind(), "Delivering message");
                (self.handler)(message);
            }
            Dispatch::Correlated(task_id) => debug!(%task_id, "Active task updated"),
            Dispatch::Reconnect(reason) => {
                warn!(reason, "Server asked for reconnect");
                return self.fail(generation);
            }
            Dispatch::Drop(reason) => trace!(%reason, "Message dropped"),
        }
        true
    }

    /// Error path shared by connect errors and disconnects.
    fn fail(self: &Arc<Self>, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        self.teardown(&mut state);
        self.schedule_reconnect(&mut state);
        false
    }

    /// Drops the transport and per-connection resources.
    fn teardown(&self, state: &mut ChannelState) {
        state.heartbeat.cleanup();
        if let Some(transport) = state.transport.take() {
            transport.disconnect();
        }
        state.generation += 1;
        self.set_status(state, ConnectionState::Disconnected);
    }

    fn set_status(&self, state: &mut ChannelState, status: ConnectionState) {
        if state.status != status {
            debug!(from = %state.status, to = %status, "Status changed");
        }
        state.status = status;
        self.status_tx.send_replace(status);
    }
}

// ============================================================================
// Inner - Timers
// ============================================================================

impl Inner {
    fn start_ping(self: &Arc<Self>, state: &mut ChannelState) {
        let weak = Arc::downgrade(self);
        state
            .heartbeat
            .start(self.options.heartbeat_interval, move || match weak.upgrade() {
                Some(inner) => {
                    inner.beat();
                    true
                }
                None => false,
            });
    }

    fn beat(&self) {
        let state = self.state.lock();
        if !state.status.is_connected() {
            return;
        }
        if let Some(transport) = &state.transport
            && let Err(e) = transport.emit(PING_EVENT, None)
        {
            debug!(error = %e, "Keepalive not sent");
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ChannelState) {
        if let Some(pending) = state.reconnect.take() {
            pending.task.abort();
        }

        state.attempts = state.attempts.saturating_add(1);
        state.reconnect_seq += 1;
        let seq = state.reconnect_seq;
        let delay = self.options.reconnect.delay_for_attempt(state.attempts);

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_reconnect(seq);
            }
        });
        state.reconnect = Some(PendingReconnect { seq, task });

        info!(
            attempt = state.attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );
    }

    fn fire_reconnect(self: &Arc<Self>, seq: u64) {
        let mut state = self.state.lock();
        if state.reconnect.as_ref().is_none_or(|pending| pending.seq != seq) {
            return;
        }
        state.reconnect = None;
        let opened = self.open_locked(&mut state);
        drop(state);

        if let Some((generation, events)) = opened {
            self.spawn_pump(generation, events);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(pending) = state.reconnect.take() {
            pending.task.abort();
        }
        state.heartbeat.cleanup();
        if let Some(transport) = state.transport.take() {
            transport.disconnect();
        }
    }
}

/// Feeds one transport's events into the state machine, in order.
async fn pump_events(
    weak: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if !inner.handle_event(generation, event) {
            break;
        }
    }
    trace!(generation, "Event pump finished");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::OnceLock;
    use std::time::Duration;

    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use crate::channel::options::ReconnectPolicy;
    use crate::transport::EventSender;
    use crate::transport::mock::MockConnector;

    type Received = Arc<Mutex<Vec<InboundMessage>>>;

    fn channel_with(connector: &MockConnector) -> (TaskChannel, Received) {
        build(connector, ReconnectPolicy::default())
    }

    fn build(connector: &MockConnector, reconnect: ReconnectPolicy) -> (TaskChannel, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let channel = TaskChannel::builder()
            .user_info(UserInfo::new("u1"))
            .reconnect(reconnect)
            .connector(connector.clone())
            .on_message(move |message| sink.lock().push(message))
            .build()
            .expect("valid configuration");

        (channel, received)
    }

    /// Lets spawned tasks drain their queues.
    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    async fn connected(connector: &MockConnector) -> (TaskChannel, Received) {
        let (channel, received) = channel_with(connector);
        channel.connect();
        connector.last().push(TransportEvent::Connect);
        settle().await;
        assert_eq!(channel.status(), ConnectionState::Connected);
        (channel, received)
    }

    fn heartbeat_armed(channel: &TaskChannel) -> bool {
        channel.inner.state.lock().heartbeat.is_armed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let connector = MockConnector::default();
        let (channel, _) = channel_with(&connector);
        assert_eq!(channel.status(), ConnectionState::Disconnected);

        channel.connect();
        channel.connect();
        settle().await;
        channel.connect();

        assert_eq!(connector.open_count(), 1);
        assert_eq!(channel.status(), ConnectionState::Connecting);

        let link = connector.last();
        assert_eq!(
            link.endpoint.as_str(),
            "ws://localhost:8000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(link.auth, Some(json!({ "user_id": "u1" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_starts_heartbeat() {
        let connector = MockConnector::default();
        let (channel, _) = connected(&connector).await;
        let link = connector.last();

        assert!(heartbeat_armed(&channel));
        assert_eq!(link.emitted_count("ping"), 0);

        sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(link.emitted_count("ping"), 1);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(link.emitted_count("ping"), 2);
        assert_eq!(link.emitted()[0], ("ping".to_owned(), None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_scenario() {
        let connector = MockConnector::default();
        let (channel, received) = connected(&connector).await;
        let link = connector.last();

        link.message(json!({ "type": "status", "status": "pending", "task_id": "A1" }));
        settle().await;
        assert_eq!(channel.active_task(), Some(TaskId::from("A1")));
        assert!(received.lock().is_empty());

        link.message(json!({ "type": "chunk", "task_id": "A1", "data": "x" }));
        settle().await;
        assert_eq!(received.lock().len(), 1);

        link.message(json!({ "type": "chunk", "task_id": "B9", "data": "y" }));
        settle().await;
        assert_eq!(received.lock().len(), 1);

        link.message(json!({ "type": "result", "task_id": "A1", "data": "done" }));
        link.message(json!({ "type": "pong" }));
        link.message(json!("garbage"));
        settle().await;

        let received = received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].kind(), "chunk");
        let InboundMessage::Result(result) = &received[1] else {
            panic!("Expected result");
        };
        assert_eq!(result.get("data"), Some(&json!("done")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_tears_down_and_reconnects_once() {
        let connector = MockConnector::default();
        let (channel, _) = connected(&connector).await;
        let first = connector.link(0);

        first.push(TransportEvent::Disconnect("transport close".into()));
        settle().await;

        assert_eq!(channel.status(), ConnectionState::Disconnected);
        assert!(!heartbeat_armed(&channel));
        assert!(first.is_disconnected());
        assert_eq!(connector.open_count(), 1);

        sleep(Duration::from_millis(900)).await;
        assert_eq!(connector.open_count(), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(connector.open_count(), 2);
        assert_eq!(channel.status(), ConnectionState::Connecting);

        sleep(Duration::from_secs(65)).await;
        assert_eq!(connector.open_count(), 2);
        assert!(!heartbeat_armed(&channel));
        assert_eq!(first.emitted_count("ping"), 0);
        assert_eq!(connector.last().emitted_count("ping"), 0);

        connector.last().push(TransportEvent::Connect);
        settle().await;
        assert!(channel.is_connected());
        assert!(heartbeat_armed(&channel));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_retries_forever() {
        let connector = MockConnector::default();
        let (channel, _) = channel_with(&connector);
        channel.connect();

        for attempt in 1..=5 {
            connector
                .last()
                .push(TransportEvent::ConnectError("refused".into()));
            settle().await;
            assert_eq!(channel.status(), ConnectionState::Disconnected);

            sleep(Duration::from_secs(1)).await;
            settle().await;
            assert_eq!(connector.open_count(), attempt + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_message_takes_error_path() {
        let connector = MockConnector::default();
        let (channel, received) = connected(&connector).await;

        connector.last().message(json!({ "type": "disconnect" }));
        settle().await;

        assert_eq!(channel.status(), ConnectionState::Disconnected);
        assert!(received.lock().is_empty());

        sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(connector.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_emits_nothing() {
        let connector = MockConnector::default();
        let (channel, _) = channel_with(&connector);

        let err = assert_err!(channel.send_message("create", &json!({ "query": "hi" })));
        assert!(matches!(err, Error::NotConnected));

        channel.connect();
        assert_err!(channel.send_message("create", &json!({ "query": "hi" })));
        assert!(connector.last().emitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_when_connected() {
        let connector = MockConnector::default();
        let (channel, _) = connected(&connector).await;

        assert_ok!(channel.send_message("create", &json!({ "query": "hi", "model": 1 })));
        assert_eq!(
            connector.last().emitted(),
            vec![(
                "message".to_owned(),
                Some(json!({ "type": "create", "query": "hi", "model": 1 }))
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_requests() {
        let connector = MockConnector::default();
        let (channel, _) = connected(&connector).await;

        assert_ok!(channel.create_task("why", 3, true));
        assert_ok!(channel.cancel_task(&TaskId::from("A1")));

        let emitted = connector.last().emitted();
        assert_eq!(
            emitted[0].1,
            Some(json!({ "type": "create", "query": "why", "user_id": "u1", "model": 3, "stream": true }))
        );
        assert_eq!(
            emitted[1].1,
            Some(json!({ "type": "cancel", "task_id": "A1" }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_socket_cancels_pending_reconnect() {
        let connector = MockConnector::default();
        let (channel, _) = connected(&connector).await;

        connector
            .last()
            .push(TransportEvent::Disconnect("ping timeout".into()));
        settle().await;
        channel.close_socket();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.open_count(), 1);
        assert_eq!(channel.status(), ConnectionState::Disconnected);
    }

    /// Records, for every open, whether the channel's state lock was held.
    #[derive(Clone, Default)]
    struct LockCheckingConnector {
        links: MockConnector,
        channel: Arc<OnceLock<Weak<Inner>>>,
        locked: Arc<Mutex<Vec<bool>>>,
    }

    impl Connector for LockCheckingConnector {
        fn open(&self, endpoint: &Url, auth: Option<Value>, events: EventSender) -> Box<dyn Transport> {
            if let Some(inner) = self.channel.get().and_then(Weak::upgrade) {
                self.locked.lock().push(inner.state.try_lock().is_none());
            }
            self.links.open(endpoint, auth, events)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_opens_within_timer_check() {
        let connector = LockCheckingConnector::default();
        let channel = TaskChannel::builder()
            .connector(connector.clone())
            .on_message(|_| {})
            .build()
            .expect("valid configuration");
        let _ = connector.channel.set(Arc::downgrade(&channel.inner));

        channel.connect();
        connector
            .links
            .last()
            .push(TransportEvent::ConnectError("refused".into()));
        settle().await;
        sleep(Duration::from_secs(1)).await;
        settle().await;

        assert_eq!(connector.links.open_count(), 2);
        assert_eq!(*connector.locked.lock(), vec![true, true]);

        channel.close_socket();
        assert!(connector.links.last().is_disconnected());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.links.open_count(), 2);
        assert_eq!(channel.status(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_racing_reconnect_timer_stays_closed() {
        for _ in 0..50 {
            let connector = MockConnector::default();
            let (channel, _) = build(&connector, ReconnectPolicy::Fixed(Duration::from_millis(1)));

            channel.connect();
            connector
                .last()
                .push(TransportEvent::ConnectError("refused".into()));
            sleep(Duration::from_millis(1)).await;
            channel.close_socket();
            let opened = connector.open_count();

            sleep(Duration::from_millis(20)).await;
            assert_eq!(connector.open_count(), opened);
            assert_eq!(channel.status(), ConnectionState::Disconnected);
            assert!(connector.last().is_disconnected());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_then_reconnect_same_instance() {
        let connector = MockConnector::default();
        let (channel, _) = connected(&connector).await;
        let first = connector.last();

        channel.close_socket();
        assert!(first.is_disconnected());
        assert!(!heartbeat_armed(&channel));
        assert_eq!(channel.status(), ConnectionState::Disconnected);

        channel.close_socket();

        channel.connect();
        assert_eq!(connector.open_count(), 2);
        connector.last().push(TransportEvent::Connect);
        settle().await;
        assert!(channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_transport_is_ignored() {
        let connector = MockConnector::default();
        let (channel, received) = connected(&connector).await;
        let stale = connector.link(0);

        stale.push(TransportEvent::Disconnect("gone".into()));
        settle().await;
        sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(connector.open_count(), 2);

        stale.push(TransportEvent::Connect);
        stale.message(json!({ "type": "status", "status": "pending", "task_id": "Z" }));
        settle().await;

        assert_eq!(channel.status(), ConnectionState::Connecting);
        assert!(channel.active_task().is_none());
        assert!(received.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_task_survives_reconnect() {
        let connector = MockConnector::default();
        let (channel, received) = connected(&connector).await;

        connector
            .last()
            .message(json!({ "type": "status", "status": "pending", "task_id": "A1" }));
        connector.last().push(TransportEvent::Disconnect("blip".into()));
        settle().await;
        sleep(Duration::from_secs(1)).await;
        settle().await;

        let link = connector.last();
        link.push(TransportEvent::Connect);
        link.message(json!({ "type": "result", "task_id": "A1" }));
        settle().await;

        assert_eq!(channel.active_task(), Some(TaskId::from("A1")));
        assert_eq!(received.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_resets_after_connect() {
        let connector = MockConnector::default();
        let policy = ReconnectPolicy::Backoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
            jitter: 0.0,
        };
        let (channel, _) = build(&connector, policy);
        channel.connect();

        connector.last().push(TransportEvent::ConnectError("refused".into()));
        settle().await;
        sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(connector.open_count(), 2);

        connector.last().push(TransportEvent::ConnectError("refused".into()));
        settle().await;
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(connector.open_count(), 2);
        sleep(Duration::from_millis(600)).await;
        assert_eq!(connector.open_count(), 3);

        connector.last().push(TransportEvent::Connect);
        connector.last().push(TransportEvent::Disconnect("blip".into()));
        settle().await;
        sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(connector.open_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_subscription() {
        let connector = MockConnector::default();
        let (channel, _) = channel_with(&connector);
        let mut status = channel.subscribe_status();
        assert_eq!(*status.borrow(), ConnectionState::Disconnected);

        channel.connect();
        assert_eq!(*status.borrow_and_update(), ConnectionState::Connecting);

        connector.last().push(TransportEvent::Connect);
        assert_ok!(status.changed().await);
        assert_eq!(*status.borrow_and_update(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_last_handle_disconnects() {
        let connector = MockConnector::default();
        let (channel, _) = connected(&connector).await;
        let link = connector.last();

        let clone = channel.clone();
        drop(channel);
        assert!(!link.is_disconnected());

        drop(clone);
        assert!(link.is_disconnected());

        sleep(Duration::from_secs(60)).await;
        assert_eq!(link.emitted_count("ping"), 0);
    }
}
