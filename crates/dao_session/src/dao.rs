//! Contracts of the per-connection data-access object and its observables.
//!
//! The session only ever talks to these traits; the observable structures
//! and the cache behind a DAO are the embedding application's concern.

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::DaoError;

/// Result of a point operation on a DAO.
pub type DaoFuture = BoxFuture<'static, Result<Value, DaoError>>;

/// Callback attached to an [`Observable`]; receives `(signal, args)`.
///
/// Observables identify a registered callback by pointer identity
/// ([`Arc::ptr_eq`]) when it is detached.
pub type ObserverFn = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

/// A value that emits signals over time.
pub trait Observable: Send + Sync {
    fn observe(&self, observer: ObserverFn);
    fn unobserve(&self, observer: &ObserverFn);
}

/// The data-access object owned by one session.
///
/// Point operations return boxed futures; a failure that happens before any
/// asynchronous work simply yields an immediately ready `Err`.
pub trait Dao: Send + Sync {
    fn request(&self, method: &Value, args: Vec<Value>) -> DaoFuture;
    fn get(&self, what: &Value) -> DaoFuture;
    fn observable(&self, what: &Value) -> Result<Arc<dyn Observable>, DaoError>;
    /// Release everything the DAO holds. Called exactly once, at teardown.
    fn dispose(&self);
}

/// How a DAO factory produced its DAO.
pub enum DaoResolution {
    Ready(Box<dyn Dao>),
    Pending(BoxFuture<'static, Result<Box<dyn Dao>, DaoError>>),
}

/// What the factory gets to know about the connection being initialized.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext<'a> {
    pub connection_id: &'a str,
    pub session_id: &'a str,
    /// Extra fields of the `initializeSession` message.
    pub init: &'a Map<String, Value>,
}

/// Produces a DAO for a connection from its `initializeSession` handshake.
///
/// This is where authentication hooks in: returning `Err` (or a pending
/// resolution that fails) rejects the connection with `authenticationError`.
pub trait DaoFactory: Send + Sync {
    fn create(&self, ctx: SessionContext<'_>) -> Result<DaoResolution, DaoError>;
}

impl<F> DaoFactory for F
where
    F: Fn(SessionContext<'_>) -> Result<DaoResolution, DaoError> + Send + Sync,
{
    fn create(&self, ctx: SessionContext<'_>) -> Result<DaoResolution, DaoError> {
        self(ctx)
    }
}
