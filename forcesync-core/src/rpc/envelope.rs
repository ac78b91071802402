/*
    envelope.rs - JSON message envelope and action names

    Outbound messages are JSON objects carrying at least `action`; the
    correlator adds `sessionId` and `requestId`:

    ```json
    { "action": "saveForce", "sessionId": "...", "requestId": "...", "data": { ... } }
    ```

    Replies echo `requestId`. Unsolicited pushes carry only `action`.
*/

use serde_json::{Map, Value};
use thiserror::Error;

pub const ACTION_REGISTER: &str = "register";
pub const ACTION_SAVE_FORCE: &str = "saveForce";
pub const ACTION_GET_FORCE: &str = "getForce";
pub const ACTION_LIST_FORCES: &str = "listForces";
pub const ACTION_DEL_FORCE: &str = "delForce";
pub const ACTION_SUBSCRIBE_UPDATES: &str = "subscribeToForceUpdates";
pub const ACTION_UNSUBSCRIBE_UPDATES: &str = "unsubscribeFromForceUpdates";
pub const ACTION_UPDATED_FORCE: &str = "updatedForce";
pub const ACTION_ERROR: &str = "error";

/// Handlers registered under this action see every action-bearing message
pub const WILDCARD_ACTION: &str = "*";

/// `saveForce` reply code: the instance id belongs to someone else
pub const CODE_NOT_OWNER: &str = "not_owner";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub action: Option<String>,
    pub request_id: Option<String>,
    pub body: Map<String, Value>,
}

impl InboundMessage {
    pub fn parse(frame: &str) -> Result<Self, EnvelopeError> {
        match serde_json::from_str::<Value>(frame)? {
            Value::Object(body) => Ok(InboundMessage {
                action: body.get("action").and_then(Value::as_str).map(str::to_string),
                request_id: body.get("requestId").and_then(Value::as_str).map(str::to_string),
                body,
            }),
            _ => Err(EnvelopeError::NotAnObject),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// `data` payload, ignoring an explicit null
    pub fn data(&self) -> Option<&Value> {
        self.get("data").filter(|v| !v.is_null())
    }

    pub fn code(&self) -> Option<&str> {
        self.str_field("code")
    }

    pub fn is_not_owner(&self) -> bool {
        self.code() == Some(CODE_NOT_OWNER)
    }
}

/// Stamp session and request ids onto an outbound payload.
/// Returns `None` when the payload is not a JSON object.
pub fn stamp(payload: Value, session_id: &str, request_id: &str) -> Option<String> {
    let Value::Object(mut body) = payload else {
        return None;
    };
    body.insert("sessionId".to_string(), Value::String(session_id.to_string()));
    body.insert("requestId".to_string(), Value::String(request_id.to_string()));
    Some(Value::Object(body).to_string())
}

/// The `action` of an outbound payload, for logging
pub fn action_of(payload: &Value) -> &str {
    payload.get("action").and_then(Value::as_str).unwrap_or("-")
}
