//! Tabula Core - shared types for the project database manager
//!
//! A Tabula "project" is an independent PostgreSQL database on a shared
//! server. This crate provides the pieces every other Tabula crate depends
//! on:
//!
//! - `TabulaError` - the library-wide error taxonomy
//! - `naming` - project name to database identifier encoding
//! - `comment` - the project metadata record stored in the database comment
//! - `ProjectIdentity`, `AccessLevel`, `ConnectionState` - session types
//! - `EventReporter` - capability for surfacing outcomes to a host UI

mod error;
mod report;
mod types;

pub mod comment;
pub mod naming;

pub use comment::ProjectMetadata;
pub use error::{Result, TabulaError};
pub use report::{EventOutcome, EventReporter, LogReporter};
pub use types::{AccessLevel, ConnectionState, ProjectIdentity};

/// Maximum length PostgreSQL allows for an identifier.
pub const MAX_SQL_NAME_LENGTH: usize = 64;

/// Prefix marking a table as internal to Tabula rather than user data.
pub const INTERNAL_TABLE_PREFIX: &str = "__";

/// The pseudo-database used for server-only connections.
pub const DEFAULT_DATABASE: &str = "postgres";

/// Default PostgreSQL server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default PostgreSQL server port.
pub const DEFAULT_PORT: u16 = 5432;
