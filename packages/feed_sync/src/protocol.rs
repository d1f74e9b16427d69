//! Room feed wire protocol
//!
//! Every inbound frame is a JSON object in one of two tagged shapes:
//!
//! ```text
//! {"type":"history","data":[Message, ...]}   full snapshot, replaces the transcript
//! {"type":"message","data":Message}          one incremental message
//! ```
//!
//! Existing feeds also emit a bare message object with no `type` wrapper, and a
//! `message` frame whose `data` is missing. Both are accepted as incremental
//! messages as long as the object carries at least one message field.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One chat message as carried by the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque id, unique within a room's feed. `None` for status-only messages.
    /// The feed sends integer row ids; strings are accepted too.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub room: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub agent: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    /// Raw timestamp as sent by the feed; never validated.
    #[serde(
        default,
        rename = "ts",
        alias = "timestamp",
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
}

impl Message {
    /// The id used for deduplication, if any.
    pub fn dedup_key(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Parse the raw timestamp as RFC 3339. `None` when absent or unparsable.
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    History(Vec<Message>),
    Message(Message),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("history data is not an array")]
    HistoryNotArray,

    #[error("message payload is not a JSON object")]
    PayloadNotAnObject,

    #[error("invalid message payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("object carries no message fields")]
    NotAMessage,
}

/// Keys that make an object message-shaped.
const MESSAGE_KEYS: &[&str] = &["id", "room", "agent", "kind", "content", "ts", "timestamp"];

/// Decode one text frame from the feed.
pub fn decode_frame(text: &str) -> Result<Frame, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let tag = match object.get("type") {
        None => None,
        Some(Value::String(tag)) => Some(tag.clone()),
        Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
    };

    match tag.as_deref() {
        Some("history") => match object.remove("data") {
            None | Some(Value::Null) => Ok(Frame::History(Vec::new())),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(message_from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Frame::History),
            Some(_) => Err(DecodeError::HistoryNotArray),
        },
        Some("message") => match object.remove("data") {
            None | Some(Value::Null) => message_from_object(object).map(Frame::Message),
            Some(data) => message_from_value(data).map(Frame::Message),
        },
        None => message_from_object(object).map(Frame::Message),
        Some(other) => Err(DecodeError::UnknownType(other.to_string())),
    }
}

fn message_from_value(value: Value) -> Result<Message, DecodeError> {
    match value {
        Value::Object(object) => message_from_object(object),
        _ => Err(DecodeError::PayloadNotAnObject),
    }
}

fn message_from_object(object: Map<String, Value>) -> Result<Message, DecodeError> {
    if !MESSAGE_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Err(DecodeError::NotAMessage);
    }
    serde_json::from_value(Value::Object(object)).map_err(DecodeError::Payload)
}

/// Accept a string, number or bool as a string; `null` and `""` mean absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
