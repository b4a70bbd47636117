//! Inbound message types.
//!
//! Messages arrive as the payload of the transport's `message` event. The
//! backend wraps them in a response envelope:
//!
//! ```json
//! {
//!   "code": 200,
//!   "status": 1,
//!   "message": "",
//!   "data": { "type": "chunk", "task_id": "A1", "chunk_index": 3, "content": "..." }
//! }
//! ```
//!
//! [`unwrap_envelope`] strips the envelope (payloads without one are taken
//! as-is) and [`InboundMessage::decode`] turns the inner object into one of
//! six variants. Nothing beyond `type`, `task_id` and `status` is validated.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::TaskId;

// ============================================================================
// TaskStatus
// ============================================================================

/// Lifecycle status of a backend task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, not started.
    Pending,
    /// Being computed.
    Processing,
    /// Streaming output.
    Outputting,
    /// Finished successfully.
    Succeeded,
    /// Stopped before completion.
    Interrupted,
    /// Finished with an error.
    Failed,
    /// Cancelled on request.
    Cancelled,
    /// Any status this client does not know.
    Unknown,
}

impl TaskStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Outputting => "outputting",
            Self::Succeeded => "succeeded",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "outputting" => Self::Outputting,
            "succeeded" => Self::Succeeded,
            "interrupted" => Self::Interrupted,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TaskFrame
// ============================================================================

/// A chunk or result belonging to a task.
///
/// Keeps the whole message object; accessors read the well-known fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFrame {
    task_id: Option<TaskId>,
    body: Value,
}

impl TaskFrame {
    /// Returns the task this frame belongs to, if the server said.
    #[inline]
    #[must_use]
    pub fn task_id(&self) -> Option<&TaskId> {
        self.task_id.as_ref()
    }

    /// Returns the text carried by the frame.
    #[inline]
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.body.get("content").and_then(Value::as_str)
    }

    /// Returns the 1-based position of a chunk in its stream.
    #[inline]
    #[must_use]
    pub fn chunk_index(&self) -> Option<u64> {
        self.body.get("chunk_index").and_then(Value::as_u64)
    }

    /// Returns `true` if this chunk closes the stream.
    #[inline]
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.body
            .get("is_final")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns any field of the message object.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Returns the whole message object.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }
}

// ============================================================================
// StatusUpdate
// ============================================================================

/// A task status notification.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    task_id: Option<TaskId>,
    status: Option<TaskStatus>,
    body: Value,
}

impl StatusUpdate {
    /// Returns the task the status refers to.
    #[inline]
    #[must_use]
    pub fn task_id(&self) -> Option<&TaskId> {
        self.task_id.as_ref()
    }

    /// Returns the reported status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<TaskStatus> {
        self.status
    }

    /// Returns `Some(id)` if this update announces a new pending task.
    #[inline]
    #[must_use]
    pub fn pending_task(&self) -> Option<&TaskId> {
        match self.status {
            Some(TaskStatus::Pending) => self.task_id.as_ref(),
            _ => None,
        }
    }

    /// Returns the whole message object.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }
}

// ============================================================================
// InboundMessage
// ============================================================================

/// A message received from the backend, decoded once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Streamed fragment of a task result.
    Chunk(TaskFrame),
    /// Complete task result.
    Result(TaskFrame),
    /// Task status change.
    Status(StatusUpdate),
    /// Heartbeat acknowledgement.
    Pong,
    /// Server-reported connection failure.
    ConnectError(Value),
    /// Server-reported disconnect.
    Disconnect(Value),
}

impl InboundMessage {
    /// Decodes a message object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMessage`] if the payload is not an object,
    /// has no string `type`, or the type is not one of the six known ones.
    pub fn decode(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::malformed("payload is not an object"))?;

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed("missing `type` field"))?;

        let task_id = object
            .get("task_id")
            .and_then(Value::as_str)
            .map(TaskId::from);

        let message = match kind {
            "chunk" => Self::Chunk(TaskFrame {
                task_id,
                body: value.clone(),
            }),
            "result" => Self::Result(TaskFrame {
                task_id,
                body: value.clone(),
            }),
            "status" => Self::Status(StatusUpdate {
                task_id,
                status: object
                    .get("status")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok()),
                body: value.clone(),
            }),
            "pong" => Self::Pong,
            "connect_error" => Self::ConnectError(value.clone()),
            "disconnect" => Self::Disconnect(value.clone()),
            other => return Err(Error::malformed(format!("unknown type `{other}`"))),
        };

        Ok(message)
    }

    /// Returns the wire `type` of the message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Chunk(_) => "chunk",
            Self::Result(_) => "result",
            Self::Status(_) => "status",
            Self::Pong => "pong",
            Self::ConnectError(_) => "connect_error",
            Self::Disconnect(_) => "disconnect",
        }
    }

    /// Returns the task ID carried by the message, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Chunk(frame) | Self::Result(frame) => frame.task_id(),
            Self::Status(update) => update.task_id(),
            _ => None,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Strips the backend response envelope.
///
/// An object with numeric `code` and `status` is an envelope; its `data` is
/// the message. Anything else is returned unchanged.
///
/// # Errors
///
/// - [`Error::Server`] if the envelope reports failure (`status == 0`)
/// - [`Error::MalformedMessage`] if a successful envelope carries no `data`
pub fn unwrap_envelope(value: &Value) -> Result<&Value> {
    let (Some(code), Some(status)) = (
        value.get("code").and_then(Value::as_i64),
        value.get("status").and_then(Value::as_i64),
    ) else {
        return Ok(value);
    };

    if status == 0 {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(Error::server(code, message));
    }

    match value.get("data") {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(Error::malformed("envelope without data")),
    }
}

// ============================================================================
// Tests
// ============================================================================
