//! Channel configuration.
//!
//! Every value here is fixed or supplied by the application; nothing is
//! computed at runtime except reconnect jitter.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use task_channel::{ReconnectPolicy, TaskChannel};
//!
//! let channel = TaskChannel::builder()
//!     .origin("https://tasks.example.com")
//!     .reconnect(ReconnectPolicy::backoff())
//!     .heartbeat_interval(Duration::from_secs(15))
//!     .on_message(|message| println!("{message:?}"))
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::Result;
use crate::transport::endpoint_url;

// ============================================================================
// Constants
// ============================================================================

/// Backend origin used when none is configured.
pub const DEFAULT_ORIGIN: &str = "http://localhost:8000";

/// Socket.IO mount path on the backend.
pub const DEFAULT_PATH: &str = "/socket.io/";

/// Period of the keepalive signal.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before reconnecting after an error or disconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Backoff base delay.
pub const BACKOFF_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Backoff ceiling.
pub const BACKOFF_MAX_DELAY: Duration = Duration::from_millis(5000);

/// Backoff randomization factor.
pub const BACKOFF_JITTER: f64 = 0.5;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// When to retry after the channel fails.
///
/// Retries never stop; the policy only shapes the delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed(Duration),

    /// Doubling delay from `base`, capped at `max`, randomized by `jitter`.
    Backoff {
        /// Delay before the first attempt.
        base: Duration,
        /// Upper bound for any delay.
        max: Duration,
        /// Fraction of the delay to randomize, in `0.0..=1.0`.
        jitter: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Backoff with the stock parameters (1s base, 5s cap, 0.5 jitter).
    #[inline]
    #[must_use]
    pub const fn backoff() -> Self {
        Self::Backoff {
            base: BACKOFF_BASE_DELAY,
            max: BACKOFF_MAX_DELAY,
            jitter: BACKOFF_JITTER,
        }
    }

    /// Returns the delay before reconnect attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Backoff { base, max, jitter } => {
                let exponent = attempt.saturating_sub(1).min(31) as i32;
                let mut millis = base.as_millis() as f64 * 2f64.powi(exponent);

                let jitter = jitter.clamp(0.0, 1.0);
                if jitter > 0.0 {
                    let spread = millis * jitter;
                    millis += rand::thread_rng().gen_range(-spread..=spread);
                }

                Duration::from_millis(millis.max(0.0) as u64).min(max)
            }
        }
    }
}

// ============================================================================
// UserInfo
// ============================================================================

/// Identity presented to the backend when the channel opens.
///
/// Serialized as the handshake auth payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Backend user ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Any further fields the backend expects.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserInfo {
    /// Creates user info for a user ID.
    #[inline]
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            extra: Map::new(),
        }
    }

    /// Adds an extra field.
    #[inline]
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Returns `true` if there is nothing to present.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.extra.is_empty()
    }

    /// Returns the handshake auth payload, or `None` when empty.
    #[must_use]
    pub fn auth_payload(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        serde_json::to_value(self).ok()
    }
}

// ============================================================================
// ChannelOptions
// ============================================================================

/// Validated channel configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOptions {
    /// Backend origin, e.g. `http://localhost:8000`.
    pub origin: Url,

    /// Socket.IO mount path.
    pub path: String,

    /// Keepalive period.
    pub heartbeat_interval: Duration,

    /// Delay shape between reconnect attempts.
    pub reconnect: ReconnectPolicy,

    /// Time allowed for dialing plus handshake.
    pub connect_timeout: Duration,
}

impl ChannelOptions {
    /// Returns the WebSocket endpoint for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the origin scheme is unsupported.
    pub fn endpoint(&self) -> Result<Url> {
        endpoint_url(&self.origin, &self.path)
    }
}

// ============================================================================
// Tests
// ============================================================================
