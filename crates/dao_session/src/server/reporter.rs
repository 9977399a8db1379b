use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::message::ServerMessage;
use crate::server::hooks::SessionHooks;
use crate::transport::Outbound;

/// Writes envelopes for one connection and classifies its failures.
///
/// Fatal errors only *request* a close here; teardown runs from the
/// transport's close signal, whatever caused it.
#[derive(Clone)]
pub(crate) struct Reporter {
    connection_id: Arc<str>,
    outbound: Arc<dyn Outbound>,
    hooks: Arc<SessionHooks>,
    log_errors: bool,
}

impl Reporter {
    pub fn new(
        connection_id: impl Into<Arc<str>>,
        outbound: Arc<dyn Outbound>,
        hooks: Arc<SessionHooks>,
        log_errors: bool,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            outbound,
            hooks,
            log_errors,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn hooks(&self) -> &SessionHooks {
        &self.hooks
    }

    pub fn send(&self, message: &ServerMessage) {
        match message.to_json() {
            Ok(payload) => self.write(payload),
            Err(e) => warn!(
                connection_id = %self.connection_id,
                error = %e,
                "Failed to encode envelope"
            ),
        }
    }

    pub fn send_value(&self, value: &Value) {
        self.write(value.to_string());
    }

    // Writes racing a close are expected; the client is gone either way.
    fn write(&self, payload: String) {
        if let Err(e) = self.outbound.write(payload) {
            debug!(
                connection_id = %self.connection_id,
                error = %e,
                "Dropped envelope"
            );
        }
    }

    /// Emit the local notification and diagnostic envelope for `error`, and
    /// request a close when it is fatal.
    pub fn report(&self, error: &SessionError) {
        self.log(error);

        match error {
            SessionError::Client(_) => self.hooks.client_error(&self.connection_id, error),
            SessionError::Protocol { reason, message } => {
                self.send(&ServerMessage::MalformedMessageError {
                    error: reason.clone(),
                    message: message.clone(),
                })
            }
            SessionError::DaoFactory(e) => self.send(&ServerMessage::AuthenticationError {
                error: e.message.clone(),
            }),
            SessionError::Server(_) => self.hooks.server_error(&self.connection_id, error),
            SessionError::Observe(_) => {}
        }

        if error.is_fatal() {
            self.close();
        }
    }

    fn log(&self, error: &SessionError) {
        let fatal = error.is_fatal();
        if self.log_errors {
            warn!(
                connection_id = %self.connection_id,
                kind = ?error.kind(),
                fatal,
                error = %error,
                "Session error"
            );
        } else {
            debug!(
                connection_id = %self.connection_id,
                kind = ?error.kind(),
                fatal,
                error = %error,
                "Session error"
            );
        }
    }

    pub fn close(&self) {
        self.outbound.close();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
