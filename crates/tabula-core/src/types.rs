//! Session and project identity types

use serde::{Deserialize, Serialize};

use crate::naming;

/// A project's visible name together with its derived database identifier.
///
/// The database name is always derived from the visible name; it is never
/// edited directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIdentity {
    visible_name: String,
    database_name: String,
}

impl ProjectIdentity {
    /// Create an identity from a visible project name.
    pub fn new(visible_name: impl Into<String>) -> Self {
        let visible_name = visible_name.into();
        let database_name = naming::project_to_database(&visible_name);
        Self {
            visible_name,
            database_name,
        }
    }

    pub fn visible_name(&self) -> &str {
        &self.visible_name
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }
}

/// A user's access level for the open project.
///
/// Derived on every project connect by looking the user up in the internal
/// users table; an absent user is read-only. Never cached across connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
    Admin,
}

impl AccessLevel {
    /// Map the stored access-level text to a level, defaulting to read-only.
    pub fn from_db(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "admin" => AccessLevel::Admin,
            "readwrite" | "read_write" => AccessLevel::ReadWrite,
            _ => AccessLevel::ReadOnly,
        }
    }

    pub fn can_write(&self) -> bool {
        !matches!(self, AccessLevel::ReadOnly)
    }
}

/// Connection state of the single live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection.
    Disconnected,
    /// Connected to the server's default database only.
    ServerOnly,
    /// Connected to a project database.
    Project,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_derives_database_name() {
        let identity = ProjectIdentity::new("3Sensor Pkt!");
        assert_eq!(identity.visible_name(), "3Sensor Pkt!");
        assert_eq!(identity.database_name(), "_3sensor_pkt_");
    }

    #[test]
    fn test_access_level_defaults_to_read_only() {
        assert_eq!(AccessLevel::from_db("admin"), AccessLevel::Admin);
        assert_eq!(AccessLevel::from_db("ReadWrite"), AccessLevel::ReadWrite);
        assert_eq!(AccessLevel::from_db("unknown"), AccessLevel::ReadOnly);
        assert!(!AccessLevel::ReadOnly.can_write());
    }
}
