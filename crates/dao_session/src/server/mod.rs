//! Server-side session engine.
//!
//! [`SessionRegistry`] accepts transports and runs one [`Session`] per
//! connection. A session walks `AwaitingInit` → `Initializing` → `Ready` →
//! `Closed`, routing JSON messages to its DAO and forwarding subscription
//! signals back to the client.

mod config;
mod hooks;
mod monitor;
mod registry;
mod reporter;
mod router;
mod session;
mod subscriptions;

pub use config::{HeartbeatConfig, SessionSettings};
pub use hooks::SessionHooks;
pub use registry::{ConnectionId, SessionRegistry};
pub use session::{Session, SessionStatus};
