//! Wire envelopes exchanged with the client.
//!
//! Every message is a JSON object with a `type` tag. Inbound messages are
//! decoded into [`ClientMessage`]; outbound envelopes are [`ServerMessage`],
//! except heartbeat echoes which are written back as the client's own object.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::MessageError;

/// The handshake message. Must be the first message on a connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeSession {
    pub session_id: String,
    /// Any further fields (credentials, client info) passed to the DAO factory.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    pub request_id: Value,
    pub method: Value,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventMessage {
    pub method: Value,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessage {
    pub request_id: Value,
    pub what: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PathMessage {
    pub what: Value,
}

/// A decoded inbound message.
///
/// Heartbeat variants keep the full client object (including `type`) so they
/// can be echoed back with every other field preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    InitializeSession(InitializeSession),
    Request(RequestMessage),
    Event(EventMessage),
    Get(GetMessage),
    Observe(PathMessage),
    Unobserve(PathMessage),
    Ping(Map<String, Value>),
    Pong(Map<String, Value>),
    TimeSync(Map<String, Value>),
}

impl ClientMessage {
    /// Decode a raw payload.
    pub fn parse(payload: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let Value::Object(mut fields) = value else {
            return Err(MessageError::NotAnObject);
        };
        let kind = match fields.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(MessageError::MissingType),
        };

        match kind.as_str() {
            "ping" => return Ok(ClientMessage::Ping(fields)),
            "pong" => return Ok(ClientMessage::Pong(fields)),
            "timeSync" => return Ok(ClientMessage::TimeSync(fields)),
            _ => {}
        }

        fields.remove("type");
        match kind.as_str() {
            "initializeSession" => {
                decode("initializeSession", fields).map(ClientMessage::InitializeSession)
            }
            "request" => decode("request", fields).map(ClientMessage::Request),
            "event" => decode("event", fields).map(ClientMessage::Event),
            "get" => decode("get", fields).map(ClientMessage::Get),
            "observe" => decode("observe", fields).map(ClientMessage::Observe),
            "unobserve" => decode("unobserve", fields).map(ClientMessage::Unobserve),
            _ => Err(MessageError::UnknownType(kind)),
        }
    }

    /// The wire tag of this message.
    pub fn tag(&self) -> &'static str {
        match self {
            ClientMessage::InitializeSession(_) => "initializeSession",
            ClientMessage::Request(_) => "request",
            ClientMessage::Event(_) => "event",
            ClientMessage::Get(_) => "get",
            ClientMessage::Observe(_) => "observe",
            ClientMessage::Unobserve(_) => "unobserve",
            ClientMessage::Ping(_) => "ping",
            ClientMessage::Pong(_) => "pong",
            ClientMessage::TimeSync(_) => "timeSync",
        }
    }
}

fn decode<T: DeserializeOwned>(
    kind: &'static str,
    fields: Map<String, Value>,
) -> Result<T, MessageError> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|source| MessageError::InvalidFields { kind, source })
}

/// An envelope written by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Response {
        response_id: Value,
        response: Value,
    },
    Error {
        response_id: Value,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<Value>,
    },
    Notify {
        what: Value,
        signal: String,
        args: Vec<Value>,
    },
    /// Server-initiated heartbeat.
    Ping {
        server_timestamp: u64,
    },
    MalformedMessageError {
        error: String,
        message: Value,
    },
    AuthenticationError {
        error: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Rewrite a client `ping` into the `pong` echoed back to it.
pub fn pong_reply(mut ping: Map<String, Value>) -> Value {
    ping.insert("type".to_owned(), Value::from("pong"));
    Value::Object(ping)
}

/// Stamp a client `timeSync` with the server clock.
pub fn time_sync_reply(mut sync: Map<String, Value>, server_timestamp: u64) -> Value {
    sync.insert("serverTimestamp".to_owned(), Value::from(server_timestamp));
    Value::Object(sync)
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
