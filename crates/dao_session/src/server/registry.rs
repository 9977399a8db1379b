use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::dao::DaoFactory;
use crate::error::RegistryError;
use crate::server::config::SessionSettings;
use crate::server::hooks::SessionHooks;
use crate::server::session::Session;
use crate::transport::Transport;

/// Opaque identifier of an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// A fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Sessions = DashMap<ConnectionId, (), ahash::RandomState>;

/// Keeps a connection listed in its registry. Dropping it tells the registry
/// the connection is gone.
pub(crate) struct Registration {
    id: ConnectionId,
    sessions: Arc<Sessions>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

/// Accepts transports and runs one [`Session`] per connection.
///
/// A connection stays listed until its session has torn down.
pub struct SessionRegistry {
    sessions: Arc<Sessions>,
    factory: Arc<dyn DaoFactory>,
    settings: SessionSettings,
    hooks: Arc<SessionHooks>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn DaoFactory>, settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(DashMap::default()),
            factory,
            settings,
            hooks: Arc::new(SessionHooks::new()),
        }
    }

    /// Install the hooks given to every session accepted from now on.
    pub fn with_hooks(mut self, hooks: SessionHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Start a session on `transport` under a fresh random id.
    pub fn accept(&self, transport: Transport) -> Result<ConnectionId, RegistryError> {
        self.accept_with_id(ConnectionId::random(), transport)
    }

    /// Start a session on `transport` under an id chosen by the caller, such
    /// as one the underlying connection already carries.
    ///
    /// Fails while another live session holds `id`; the transport is dropped.
    /// Spawns the session task onto the current tokio runtime.
    pub fn accept_with_id(
        &self,
        id: ConnectionId,
        transport: Transport,
    ) -> Result<ConnectionId, RegistryError> {
        let registration = self.register(id.clone())?;

        let mut session = Session::new(
            id.clone(),
            transport.outbound,
            Arc::clone(&self.factory),
            self.settings.clone(),
            Arc::clone(&self.hooks),
        )
        .with_registration(registration);

        info!(connection_id = %id, active = self.sessions.len(), "Accepted connection");

        let inbound = transport.inbound;
        tokio::spawn(async move {
            session.run(inbound).await;
        });

        Ok(id)
    }

    fn register(&self, id: ConnectionId) -> Result<Registration, RegistryError> {
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(id.0)),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Registration {
                    id,
                    sessions: Arc::clone(&self.sessions),
                })
            }
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of connections that have not finished tearing down.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
