//! Message types for mpv's JSON IPC (`--input-ipc-server`).
//!
//! Every message is a single line of JSON. Clients send `{"command": [...],
//! "request_id": n}` and mpv answers with a reply carrying the same
//! `request_id`. Events such as `file-loaded` arrive interleaved with replies
//! on the same socket, so readers classify each line with [`parse_message`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const MAX_LINE_BYTES: usize = 1024 * 1024; // 1MB
pub const SUCCESS: &str = "success";

pub const PROPERTY_PLAYBACK_TIME: &str = "playback-time";
pub const PROPERTY_IDLE_ACTIVE: &str = "idle-active";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message of {len} bytes exceeds the {max} byte limit", max = MAX_LINE_BYTES)]
    TooLarge { len: usize },

    #[error("message was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message was not a JSON object")]
    NotAnObject,

    #[error("message was neither a reply nor an event")]
    Unrecognized,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub command: Vec<Value>,
    pub request_id: u64,
}

impl Request {
    pub fn new(request_id: u64, command: Vec<Value>) -> Self {
        Self {
            command,
            request_id,
        }
    }

    pub fn get_property(request_id: u64, name: &str) -> Self {
        Self::new(request_id, vec![json!("get_property"), json!(name)])
    }

    pub fn seek_absolute(request_id: u64, seconds: f64) -> Self {
        Self::new(
            request_id,
            vec![json!("seek"), json!(seconds), json!("absolute")],
        )
    }

    /// mpv's native small rewind: steps back one frame and pauses.
    pub fn frame_back_step(request_id: u64) -> Self {
        Self::new(request_id, vec![json!("frame-back-step")])
    }

    /// Command name, used in logs and error messages.
    pub fn name(&self) -> &str {
        self.command
            .first()
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
    }

    /// Serialized form ready to be written to the socket, newline included.
    pub fn to_line(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    #[serde(default)]
    pub request_id: u64,
    pub error: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.error == SUCCESS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Playback lifecycle notifications the watcher reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started,
    Stopped,
    Ended,
}

impl Event {
    pub fn lifecycle(&self) -> Option<PlaybackEvent> {
        match self.event.as_str() {
            "file-loaded" => Some(PlaybackEvent::Started),
            "end-file" => match self.reason.as_deref() {
                Some("eof") => Some(PlaybackEvent::Ended),
                _ => Some(PlaybackEvent::Stopped),
            },
            _ => None,
        }
    }

    /// mpv is about to exit; no further replies will arrive.
    pub fn is_shutdown(&self) -> bool {
        self.event == "shutdown"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Reply(Reply),
    Event(Event),
}

pub fn parse_message(line: &[u8]) -> Result<Message, ProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLarge { len: line.len() });
    }

    let value: Value = serde_json::from_slice(line)?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    if object.contains_key("event") {
        return Ok(Message::Event(serde_json::from_value(value)?));
    }
    if object.contains_key("error") {
        return Ok(Message::Reply(serde_json::from_value(value)?));
    }
    Err(ProtocolError::Unrecognized)
}
