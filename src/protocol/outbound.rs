//! Outbound message types.
//!
//! Everything the application sends goes out on the transport's generic
//! `message` event as a flat object `{ "type": ..., ...fields }`.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::TaskId;

// ============================================================================
// OutboundMessage
// ============================================================================

/// A message sent verbatim on the generic `message` channel.
///
/// # Format
///
/// ```json
/// { "type": "create", "query": "...", "user_id": "u1", "model": 1, "stream": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: String,

    /// Application fields, flattened next to `type`.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OutboundMessage {
    /// Builds a message from a type and any serializable object.
    ///
    /// `null` data yields a message with only `type`. A `type` key inside
    /// `data` is discarded in favour of `kind`.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if `data` fails to serialize
    /// - [`Error::InvalidArgument`] if `data` is not an object
    pub fn new<T: Serialize + ?Sized>(kind: impl Into<String>, data: &T) -> Result<Self> {
        let mut fields = match serde_json::to_value(data)? {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(Error::invalid_argument(format!(
                    "message data must be an object, got {other}"
                )));
            }
        };
        fields.remove("type");

        Ok(Self {
            kind: kind.into(),
            fields,
        })
    }

    /// Converts the message into the JSON payload of the `message` event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ============================================================================
// Task Requests
// ============================================================================

/// Asks the backend to start a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateTask {
    /// The question or prompt to process.
    pub query: String,

    /// Submitting user.
    pub user_id: String,

    /// Backend model identifier.
    pub model: i64,

    /// Stream chunks (`true`) or deliver one result (`false`).
    pub stream: bool,
}

impl CreateTask {
    /// Message type of the request.
    pub const KIND: &'static str = "create";

    /// Creates a non-streaming request for the default user.
    #[must_use]
    pub fn new(query: impl Into<String>, model: i64) -> Self {
        Self {
            query: query.into(),
            user_id: "default".to_owned(),
            model,
            stream: false,
        }
    }

    /// Requests streamed chunks.
    #[inline]
    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Sets the submitting user.
    #[inline]
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// Asks the backend to cancel a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelTask {
    /// Task to cancel.
    pub task_id: TaskId,
}

impl CancelTask {
    /// Message type of the request.
    pub const KIND: &'static str = "cancel";
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_fields_are_flattened_next_to_type() {
        let message = OutboundMessage::new("create", &json!({ "query": "hi", "model": 1 })).unwrap();
        assert_eq!(
            message.to_value().unwrap(),
            json!({ "type": "create", "query": "hi", "model": 1 })
        );
    }

    #[test]
    fn test_explicit_type_wins() {
        let message = OutboundMessage::new("cancel", &json!({ "type": "create", "task_id": "A1" })).unwrap();
        assert_eq!(
            message.to_value().unwrap(),
            json!({ "type": "cancel", "task_id": "A1" })
        );
    }

    #[test]
    fn test_null_data_sends_type_only() {
        let message = OutboundMessage::new("ping", &Value::Null).unwrap();
        assert_eq!(message.to_value().unwrap(), json!({ "type": "ping" }));
    }

    #[test]
    fn test_non_object_data_is_rejected() {
        let err = OutboundMessage::new("create", &"just a string").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_create_task_request() {
        let request = CreateTask::new("what is rust", 2).streaming().with_user("u1");
        let message = OutboundMessage::new(CreateTask::KIND, &request).unwrap();
        assert_eq!(
            message.to_value().unwrap(),
            json!({
                "type": "create",
                "query": "what is rust",
                "user_id": "u1",
                "model": 2,
                "stream": true
            })
        );
    }

    #[test]
    fn test_cancel_task_request() {
        let request = CancelTask {
            task_id: TaskId::from("A1"),
        };
        let message = OutboundMessage::new(CancelTask::KIND, &request).unwrap();
        assert_eq!(
            message.to_value().unwrap(),
            json!({ "type": "cancel", "task_id": "A1" })
        );
    }
}
