//! Builder pattern for channel configuration.
//!
//! Provides a fluent API for configuring and creating [`TaskChannel`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use task_channel::{ReconnectPolicy, TaskChannel, UserInfo};
//!
//! # fn example() -> task_channel::Result<()> {
//! let channel = TaskChannel::builder()
//!     .origin("https://tasks.example.com")
//!     .user_info(UserInfo::new("u1"))
//!     .reconnect(ReconnectPolicy::backoff())
//!     .heartbeat_interval(Duration::from_secs(15))
//!     .on_message(|message| println!("{message:?}"))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::InboundMessage;
use crate::transport::connection::DEFAULT_CONNECT_TIMEOUT;
use crate::transport::{Connector, SocketIoConnector};

use super::core::{MessageHandler, TaskChannel};
use super::options::{
    ChannelOptions, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_ORIGIN, DEFAULT_PATH, ReconnectPolicy,
    UserInfo,
};

// ============================================================================
// ChannelBuilder
// ============================================================================

/// Builder for configuring a [`TaskChannel`] instance.
///
/// Use [`TaskChannel::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ChannelBuilder {
    /// Backend origin.
    origin: String,
    /// Socket.IO mount path.
    path: String,
    /// Identity sent on connect.
    user_info: UserInfo,
    /// Keepalive period.
    heartbeat_interval: Duration,
    /// Delay shape between reconnects.
    reconnect: ReconnectPolicy,
    /// Dial plus handshake limit.
    connect_timeout: Duration,
    /// Transport factory override.
    connector: Option<Arc<dyn Connector>>,
    /// Application callback.
    handler: Option<MessageHandler>,
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_owned(),
            path: DEFAULT_PATH.to_owned(),
            user_info: UserInfo::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connector: None,
            handler: None,
        }
    }
}

impl fmt::Debug for ChannelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("origin", &self.origin)
            .field("path", &self.path)
            .field("user_info", &self.user_info)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .field("custom_connector", &self.connector.is_some())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

// ============================================================================
// ChannelBuilder Implementation
// ============================================================================

impl ChannelBuilder {
    /// Creates a builder with default settings and no message handler.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backend origin.
    ///
    /// # Arguments
    ///
    /// * `origin` - `http`/`https` (or `ws`/`wss`) origin, e.g. "http://localhost:8000"
    #[inline]
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Sets the Socket.IO mount path.
    #[inline]
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the identity presented on connect.
    #[inline]
    #[must_use]
    pub fn user_info(mut self, user_info: UserInfo) -> Self {
        self.user_info = user_info;
        self
    }

    /// Sets the keepalive period.
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the time allowed for dialing plus handshake.
    ///
    /// Ignored when a custom connector is set.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replaces the Socket.IO connector.
    #[inline]
    #[must_use]
    pub fn connector<C: Connector>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Sets the callback for deliverable messages.
    #[inline]
    #[must_use]
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Builds the channel with validation.
    ///
    /// The channel starts disconnected; call [`TaskChannel::connect`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no message handler is set
    /// - [`Error::Url`] if the origin does not parse
    /// - [`Error::Config`] if the origin scheme, path or a timing value is invalid
    pub fn build(self) -> Result<TaskChannel> {
        let options = self.validate_options()?;
        let endpoint = options.endpoint()?;

        let handler = self.handler.ok_or_else(|| {
            Error::config(
                "Message handler is required. Use .on_message() to set it.\n\
                 Example: TaskChannel::builder().on_message(|message| println!(\"{message:?}\"))",
            )
        })?;

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(SocketIoConnector::new(options.connect_timeout)),
        };

        Ok(TaskChannel::from_parts(
            options,
            endpoint,
            self.user_info,
            handler,
            connector,
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ChannelBuilder {
    /// Validates everything except the handler.
    fn validate_options(&self) -> Result<ChannelOptions> {
        let origin = Url::parse(&self.origin)?;

        if !self.path.starts_with('/') {
            return Err(Error::config(format!(
                "Socket path must start with '/', got {:?}.\n\
                 Example: TaskChannel::builder().path(\"/socket.io/\")",
                self.path
            )));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(Error::config(
                "Heartbeat interval must be non-zero. Use .heartbeat_interval() to set it.",
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(Error::config(
                "Connect timeout must be non-zero. Use .connect_timeout() to set it.",
            ));
        }

        self.validate_reconnect()?;

        Ok(ChannelOptions {
            origin,
            path: self.path.clone(),
            heartbeat_interval: self.heartbeat_interval,
            reconnect: self.reconnect,
            connect_timeout: self.connect_timeout,
        })
    }

    /// Validates the reconnect policy.
    fn validate_reconnect(&self) -> Result<()> {
        match self.reconnect {
            ReconnectPolicy::Fixed(delay) if delay.is_zero() => Err(Error::config(
                "Reconnect delay must be non-zero. Use .reconnect() to set it.",
            )),
            ReconnectPolicy::Backoff { base, max, jitter } => {
                if base.is_zero() || max < base {
                    return Err(Error::config(format!(
                        "Backoff needs 0 < base <= max, got base {base:?} and max {max:?}."
                    )));
                }
                if !(0.0..=1.0).contains(&jitter) {
                    return Err(Error::config(format!(
                        "Backoff jitter must be within 0.0..=1.0, got {jitter}."
                    )));
                }
                Ok(())
            }
            ReconnectPolicy::Fixed(_) => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
