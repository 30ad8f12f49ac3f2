//! Tabula session management
//!
//! Owns the single live PostgreSQL connection and its state machine
//! (disconnected / server-only / project), authentication and reconnect
//! handling, server catalog queries, and the cooperative metadata-based
//! write lock.

mod config;
mod lock;
mod session;

pub use config::SessionConfig;
pub use lock::LockCoordinator;
pub use session::{DbSession, TEMP_RESULTS_TABLE};
