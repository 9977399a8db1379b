//! Per-connection protocol engine for a reactive data-access layer.
//!
//! A client connects over a duplex [`transport`], introduces itself with
//! `initializeSession`, and then issues point requests, fire-and-forget
//! events, reads and subscriptions against the [`dao::Dao`] produced for it.
//! Subscription signals are pushed back as `notify` envelopes until the
//! client unobserves or disconnects.

pub mod dao;
pub mod error;
pub mod message;
pub mod path;
pub mod server;
pub mod transport;

#[cfg(test)]
mod testing;

pub use dao::{Dao, DaoFactory, DaoFuture, DaoResolution, Observable, ObserverFn, SessionContext};
pub use error::{DaoError, ErrorKind, SessionError};
pub use server::{
    ConnectionId, HeartbeatConfig, Session, SessionHooks, SessionRegistry, SessionSettings,
    SessionStatus,
};
