//! Demo server for the `dao_session` protocol engine.
//!
//! The session machinery lives in the `dao_session` crate; this package adds
//! an in-memory DAO and a TCP binary that speaks line-delimited JSON.

pub mod memory;

pub use memory::{MemoryDao, MemoryDaoFactory, MemoryStore};

/// Address the demo server binds when `LISTEN_ADDR` is unset.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8470";
