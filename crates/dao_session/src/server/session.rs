use futures::StreamExt;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dao::{Dao, DaoFactory, DaoResolution, SessionContext};
use crate::error::{DaoError, SessionError};
use crate::message::{ClientMessage, ServerMessage, unix_millis};
use crate::server::config::SessionSettings;
use crate::server::hooks::SessionHooks;
use crate::server::monitor::{Beat, Monitor, next_beat};
use crate::server::registry::{ConnectionId, Registration};
use crate::server::reporter::Reporter;
use crate::server::router::{self, Operations, RouteContext};
use crate::server::subscriptions::SubscriptionTable;
use crate::transport::{Inbound, Outbound};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for `initializeSession`.
    AwaitingInit,
    /// The DAO factory resolution is pending; messages are queued.
    Initializing,
    /// The DAO is present and messages are routed as they arrive.
    Ready,
    /// Torn down. Terminal.
    Closed,
}

enum SessionState {
    AwaitingInit,
    Initializing { queue: VecDeque<String> },
    Ready { dao: Box<dyn Dao> },
    Closed,
}

type Resolution = BoxFuture<'static, Result<Box<dyn Dao>, DaoError>>;

/// Asynchronous work owned by the session task.
#[derive(Default)]
struct InFlight {
    resolution: Option<Resolution>,
    operations: Operations,
}

async fn resolve(resolution: &mut Option<Resolution>) -> Result<Box<dyn Dao>, DaoError> {
    match resolution {
        Some(resolution) => resolution.await,
        None => std::future::pending().await,
    }
}

/// Server side of one client connection.
///
/// A session is driven by [`Session::run`] on a single task: inbound
/// messages, DAO resolutions and heartbeat ticks are all handled there, so
/// session state is never mutated concurrently.
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    subscriptions: SubscriptionTable,
    reporter: Reporter,
    factory: Arc<dyn DaoFactory>,
    settings: SessionSettings,
    // Set once a fatal error asked for a close; later input is dropped.
    closing: bool,
    registration: Option<Registration>,
}

impl Session {
    pub fn new(
        id: ConnectionId,
        outbound: Arc<dyn Outbound>,
        factory: Arc<dyn DaoFactory>,
        settings: SessionSettings,
        hooks: Arc<SessionHooks>,
    ) -> Self {
        let reporter = Reporter::new(id.as_str(), outbound, hooks, settings.log_errors);
        Self {
            id,
            state: SessionState::AwaitingInit,
            subscriptions: SubscriptionTable::new(),
            reporter,
            factory,
            settings,
            closing: false,
            registration: None,
        }
    }

    /// Hold a registry entry that is released when the session closes.
    pub(crate) fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = Some(registration);
        self
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::AwaitingInit => SessionStatus::AwaitingInit,
            SessionState::Initializing { .. } => SessionStatus::Initializing,
            SessionState::Ready { .. } => SessionStatus::Ready,
            SessionState::Closed => SessionStatus::Closed,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Drive the session until the transport closes, then tear it down.
    pub async fn run(&mut self, mut inbound: Inbound) {
        let mut work = InFlight::default();
        let mut monitor = self.settings.heartbeat.map(Monitor::new);

        loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(payload)) => {
                        if let Some(monitor) = monitor.as_mut() {
                            monitor.seen();
                        }
                        self.on_data(payload, &mut work);
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %self.id, error = %e, "Transport failed");
                        break;
                    }
                    None => break,
                },

                resolved = resolve(&mut work.resolution), if work.resolution.is_some() => {
                    work.resolution = None;
                    self.on_resolved(resolved, &mut work);
                }

                Some(done) = work.operations.next(), if !work.operations.is_empty() => {
                    router::complete(done, &self.reporter);
                }

                beat = next_beat(&mut monitor), if monitor.is_some() => self.on_beat(beat),
            }
        }

        // In-flight DAO calls die with the connection.
        drop(work);
        self.close();
    }

    /// The close handler: detach every subscription, dispose the DAO, release
    /// the registry entry. Runs once; later calls do nothing.
    pub fn close(&mut self) {
        if matches!(self.state, SessionState::Closed) {
            return;
        }

        let unsubscribed = self.subscriptions.clear();
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Ready { dao } = previous {
            dao.dispose();
        }
        self.reporter.close();
        drop(self.registration.take());

        info!(connection_id = %self.id, unsubscribed, "Session closed");
    }

    fn on_data(&mut self, payload: String, work: &mut InFlight) {
        if self.closing {
            debug!(connection_id = %self.id, "Dropping message received after close request");
            return;
        }

        if let SessionState::Initializing { queue } = &mut self.state {
            queue.push_back(payload);
            return;
        }

        match self.status() {
            SessionStatus::AwaitingInit => self.initialize(&payload, work),
            SessionStatus::Ready => self.dispatch(payload, work),
            SessionStatus::Initializing | SessionStatus::Closed => {}
        }
    }

    fn initialize(&mut self, payload: &str, work: &mut InFlight) {
        let init = match ClientMessage::parse(payload) {
            Ok(ClientMessage::InitializeSession(init)) => init,
            Ok(other) => {
                self.fail(SessionError::Client(format!(
                    "expected initializeSession as the first message, got '{}'",
                    other.tag()
                )));
                return;
            }
            Err(e) => {
                self.fail(SessionError::Client(format!("invalid first message: {e}")));
                return;
            }
        };

        info!(
            connection_id = %self.id,
            session_id = %init.session_id,
            "Initializing session"
        );

        let ctx = SessionContext {
            connection_id: self.id.as_str(),
            session_id: &init.session_id,
            init: &init.extra,
        };
        match self.factory.create(ctx) {
            Ok(DaoResolution::Ready(dao)) => self.become_ready(dao, VecDeque::new(), work),
            Ok(DaoResolution::Pending(resolution)) => {
                self.state = SessionState::Initializing {
                    queue: VecDeque::new(),
                };
                work.resolution = Some(resolution);
            }
            Err(e) => self.fail(SessionError::DaoFactory(e)),
        }
    }

    fn on_resolved(&mut self, resolved: Result<Box<dyn Dao>, DaoError>, work: &mut InFlight) {
        let SessionState::Initializing { queue } = &mut self.state else {
            if let Ok(dao) = resolved {
                dao.dispose();
            }
            return;
        };
        let queue = std::mem::take(queue);

        match resolved {
            Ok(dao) => self.become_ready(dao, queue, work),
            Err(e) => {
                if !queue.is_empty() {
                    debug!(
                        connection_id = %self.id,
                        discarded = queue.len(),
                        "Discarding messages queued during initialization"
                    );
                }
                self.fail(SessionError::DaoFactory(e));
            }
        }
    }

    fn become_ready(&mut self, dao: Box<dyn Dao>, queue: VecDeque<String>, work: &mut InFlight) {
        info!(connection_id = %self.id, queued = queue.len(), "Session ready");
        self.state = SessionState::Ready { dao };

        for payload in queue {
            if self.closing {
                break;
            }
            self.dispatch(payload, work);
        }
    }

    fn dispatch(&mut self, payload: String, work: &mut InFlight) {
        let SessionState::Ready { dao } = &self.state else {
            return;
        };

        let result = router::decode(&payload).and_then(|message| {
            debug!(connection_id = %self.id, kind = message.tag(), "Routing message");
            router::route(
                message,
                RouteContext {
                    dao: dao.as_ref(),
                    subscriptions: &mut self.subscriptions,
                    reporter: &self.reporter,
                    operations: &mut work.operations,
                },
            )
        });

        if let Err(error) = result {
            self.fail(error);
        }
    }

    fn on_beat(&mut self, beat: Beat) {
        match beat {
            // The handshake must come first, so the client is not pinged
            // before it has sent `initializeSession`. The timeout still runs.
            Beat::Ping if matches!(self.state, SessionState::AwaitingInit) => {}
            Beat::Ping => self.reporter.send(&ServerMessage::Ping {
                server_timestamp: unix_millis(),
            }),
            Beat::TimedOut => {
                warn!(connection_id = %self.id, "Heartbeat timed out, closing connection");
                self.closing = true;
                self.reporter.close();
            }
        }
    }

    fn fail(&mut self, error: SessionError) {
        if error.is_fatal() {
            self.closing = true;
        }
        self.reporter.report(&error);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("subscriptions", &self.subscriptions.len())
            .field("closing", &self.closing)
            .finish()
    }
}
