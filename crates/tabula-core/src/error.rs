//! Error types for Tabula

use thiserror::Error;

/// Core error type for Tabula operations
///
/// Low-level driver errors are translated into one of these kinds at each
/// operation boundary. `Authentication` and `Serialization` are the only
/// kinds a caller may recover from without user action beyond re-entering
/// credentials or reconnecting.
#[derive(Error, Debug)]
pub enum TabulaError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Project is locked: {0}")]
    LockConflict(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("External process failed: {0}")]
    Process(String),

    #[error("Transaction serialization failure: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl TabulaError {
    /// Whether retrying after a reconnect can succeed without any other
    /// corrective action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TabulaError::Authentication(_) | TabulaError::Serialization(_)
        )
    }
}

/// Result type alias for Tabula operations
pub type Result<T> = std::result::Result<T, TabulaError>;
