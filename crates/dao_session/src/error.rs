use serde_json::Value;
use thiserror::Error;

/// A failure raised by a DAO operation or by the DAO factory.
///
/// `code` is forwarded to the client untouched in `error` envelopes, so it can
/// be any JSON value the DAO chooses (numeric codes, string tags, ...).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct DaoError {
    pub message: String,
    pub code: Option<Value>,
}

impl DaoError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Attach an error code that is echoed back to the client.
    pub fn with_code(mut self, code: impl Into<Value>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Errors that can occur while decoding an inbound wire message.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MessageError {
    /// The payload is not a JSON document.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is JSON but not an object.
    #[error("message must be a JSON object")]
    NotAnObject,

    /// The object has no string `type` field.
    #[error("message has no type")]
    MissingType,

    /// The `type` field names no known message.
    #[error("unknown message type '{0}'")]
    UnknownType(String),

    /// A known message is missing fields or has fields of the wrong shape.
    #[error("invalid '{kind}' message: {source}")]
    InvalidFields {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced by a transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The transport was closed by either side.
    #[error("transport closed")]
    Closed,

    /// An I/O failure on the underlying stream.
    #[error("transport I/O error")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while managing the session registry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A session is already registered under this connection id.
    #[error("session already registered for connection '{0}'")]
    AlreadyRegistered(String),
}

/// Classification of a failure inside a connection session.
///
/// Fatal kinds close the transport after emitting a single diagnostic;
/// non-fatal kinds are answered per operation and leave the session usable.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The client violated the protocol (wrong first message, duplicate observe).
    #[error("client error: {0}")]
    Client(String),

    /// A message could not be dispatched.
    #[error("malformed message: {reason}")]
    Protocol { reason: String, message: Value },

    /// The DAO factory failed or its resolution was rejected.
    #[error("DAO initialization failed: {0}")]
    DaoFactory(#[source] DaoError),

    /// A `request` or `get` failed inside the DAO.
    #[error("server error: {0}")]
    Server(#[source] DaoError),

    /// `observable(path)` failed; the subscription is not established.
    #[error("observe failed: {0}")]
    Observe(#[source] DaoError),
}

/// The coarse kind of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    Protocol,
    DaoFactory,
    Server,
    Observe,
}

impl SessionError {
    pub fn malformed(reason: impl ToString, message: Value) -> Self {
        SessionError::Protocol {
            reason: reason.to_string(),
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Client(_) => ErrorKind::Client,
            SessionError::Protocol { .. } => ErrorKind::Protocol,
            SessionError::DaoFactory(_) => ErrorKind::DaoFactory,
            SessionError::Server(_) => ErrorKind::Server,
            SessionError::Observe(_) => ErrorKind::Observe,
        }
    }

    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Client | ErrorKind::Protocol | ErrorKind::DaoFactory
        )
    }
}
