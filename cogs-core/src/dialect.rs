//! Inbound frame classification.
//!
//! The service speaks a loose JSON dialect: every reply is an object whose
//! shape is identified by which optional fields are present. Shapes
//! overlap, so recognition runs in a fixed priority order:
//!
//! ```text
//!  (a) error            message, and no uuid / channels / msg
//!  (b) session identity uuid
//!  (c) subscription list channels
//!  (d) publish ack      id, without a chan + msg pair
//!  (e) delivered message chan + msg + id + time, without a seq + action pair
//! ```
//!
//! Error frames are checked first so they are never taken for successes.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::CogsError;

// ── Response variants ────────────────────────────────────────────

/// Reply to a `session-uuid` command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionIdentity {
    pub seq: u64,
    pub action: String,
    pub code: i64,
    pub uuid: String,
}

/// Reply to any subscription command, listing the current channels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionList {
    pub seq: u64,
    pub action: String,
    pub code: i64,
    pub channels: Vec<String>,
}

/// Acknowledgement of a publish with `ack: true`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishAck {
    pub seq: u64,
    pub action: String,
    pub code: i64,
    #[serde(rename = "id")]
    pub message_id: String,
}

/// A message pushed to a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PubSubMessage {
    pub id: String,
    pub time: String,
    #[serde(rename = "chan")]
    pub channel: String,
    #[serde(rename = "msg")]
    pub body: String,
}

/// An error reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceError {
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub action: Option<String>,
    pub code: i64,
    pub message: String,
}

impl From<ServiceError> for CogsError {
    fn from(e: ServiceError) -> Self {
        CogsError::Service {
            code: e.code,
            message: e.message,
        }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    SessionIdentity(SessionIdentity),
    SubscriptionList(SubscriptionList),
    PublishAck(PublishAck),
    Message(PubSubMessage),
    ServiceError(ServiceError),
}

impl Response {
    /// The sequence number this frame answers, if any.
    pub fn seq(&self) -> Option<u64> {
        match self {
            Response::SessionIdentity(r) => Some(r.seq),
            Response::SubscriptionList(r) => Some(r.seq),
            Response::PublishAck(r) => Some(r.seq),
            Response::Message(_) => None,
            Response::ServiceError(r) => r.seq,
        }
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::SessionIdentity(_) => "session identity",
            Response::SubscriptionList(_) => "subscription list",
            Response::PublishAck(_) => "publish ack",
            Response::Message(_) => "message",
            Response::ServiceError(_) => "service error",
        }
    }
}

// ── Classification ───────────────────────────────────────────────

/// Parse and classify one raw inbound frame.
///
/// Returns `MalformedFrame` when the text is not JSON or a recognised
/// shape lacks a required field, and `UnrecognizedFrame` when no shape
/// matches at all.
pub fn classify(raw: &str) -> Result<Response, CogsError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| CogsError::MalformedFrame(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(CogsError::UnrecognizedFrame);
    };

    let has = |key: &str| obj.contains_key(key);

    if (has("message") || has("error")) && !has("uuid") && !has("channels") && !has("msg") {
        return decode_error(obj).map(Response::ServiceError);
    }
    if has("uuid") {
        return decode(obj).map(Response::SessionIdentity);
    }
    if has("channels") {
        return decode(obj).map(Response::SubscriptionList);
    }
    if has("id") && !(has("chan") && has("msg")) {
        return decode(obj).map(Response::PublishAck);
    }
    if has("chan") && has("msg") && has("id") && has("time") && !(has("seq") && has("action")) {
        return decode(obj).map(Response::Message);
    }

    Err(CogsError::UnrecognizedFrame)
}

fn decode<T: DeserializeOwned>(obj: Map<String, Value>) -> Result<T, CogsError> {
    serde_json::from_value(Value::Object(obj)).map_err(|e| CogsError::MalformedFrame(e.to_string()))
}

/// Error frames use `message`, but some carry the text under `error`.
fn decode_error(mut obj: Map<String, Value>) -> Result<ServiceError, CogsError> {
    if !obj.contains_key("message") {
        if let Some(text) = obj.remove("error") {
            obj.insert("message".into(), text);
        }
    }
    decode(obj)
}

// ── Tests ────────────────────────────────────────────────────────
