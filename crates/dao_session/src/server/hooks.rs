use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::SessionError;

type ErrorHook = Arc<dyn Fn(&str, &SessionError) + Send + Sync>;
type HeartbeatHook = Arc<dyn Fn(&str, &Map<String, Value>) + Send + Sync>;

/// Typed notification hooks an embedding application registers on sessions.
///
/// Every hook receives the connection id first. Several listeners may be
/// registered per hook; they run in registration order on the session task,
/// so they must not block.
#[derive(Clone, Default)]
pub struct SessionHooks {
    server_error: Vec<ErrorHook>,
    client_error: Vec<ErrorHook>,
    ping: Vec<HeartbeatHook>,
    pong: Vec<HeartbeatHook>,
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a `request` or `get` fails inside the DAO.
    pub fn on_server_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &SessionError) + Send + Sync + 'static,
    {
        self.server_error.push(Arc::new(f));
        self
    }

    /// Called when the client violates the protocol, just before the close.
    pub fn on_client_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &SessionError) + Send + Sync + 'static,
    {
        self.client_error.push(Arc::new(f));
        self
    }

    pub fn on_ping<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) + Send + Sync + 'static,
    {
        self.ping.push(Arc::new(f));
        self
    }

    pub fn on_pong<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) + Send + Sync + 'static,
    {
        self.pong.push(Arc::new(f));
        self
    }

    pub(crate) fn server_error(&self, connection_id: &str, error: &SessionError) {
        for hook in &self.server_error {
            hook(connection_id, error);
        }
    }

    pub(crate) fn client_error(&self, connection_id: &str, error: &SessionError) {
        for hook in &self.client_error {
            hook(connection_id, error);
        }
    }

    pub(crate) fn ping(&self, connection_id: &str, message: &Map<String, Value>) {
        for hook in &self.ping {
            hook(connection_id, message);
        }
    }

    pub(crate) fn pong(&self, connection_id: &str, message: &Map<String, Value>) {
        for hook in &self.pong {
            hook(connection_id, message);
        }
    }
}

impl fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHooks")
            .field("server_error", &self.server_error.len())
            .field("client_error", &self.client_error.len())
            .field("ping", &self.ping.len())
            .field("pong", &self.pong.len())
            .finish()
    }
}
