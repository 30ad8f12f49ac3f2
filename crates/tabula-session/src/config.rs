//! Server connection configuration

use tabula_core::{Result, TabulaError, DEFAULT_HOST, DEFAULT_PORT};

/// Connection parameters for the PostgreSQL server.
///
/// The password is held in memory only and never persisted.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub user: String,
    pub password: String,
    /// True when no interactive user is present (command-line script
    /// execution); the cooperative project lock is skipped in this mode.
    pub headless: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ssl: false,
            user: String::new(),
            password: String::new(),
            headless: false,
        }
    }
}

impl SessionConfig {
    /// Verify the parameters a connect attempt requires.
    ///
    /// A password may legitimately be empty; if the server rejects it the
    /// caller re-prompts.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() || self.user.is_empty() {
            return Err(TabulaError::Configuration(
                "server host and user name are required before connecting".into(),
            ));
        }
        Ok(())
    }

    /// `host[:port]/database` text used in log and error messages.
    pub fn server_and_database(&self, database: &str) -> String {
        if self.port == DEFAULT_PORT {
            format!("{}/{}", self.host, database.to_lowercase())
        } else {
            format!("{}:{}/{}", self.host, self.port, database.to_lowercase())
        }
    }

    /// Whether the host matches the documented default.
    pub fn is_default_host(&self) -> bool {
        self.host == DEFAULT_HOST
    }

    /// Whether the port matches the documented default.
    pub fn is_default_port(&self) -> bool {
        self.port == DEFAULT_PORT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_host_and_user() {
        let mut config = SessionConfig::default();
        assert!(config.validate().is_err());

        config.user = "alice".into();
        assert!(config.validate().is_ok());

        config.host.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_and_database_text() {
        let mut config = SessionConfig {
            user: "alice".into(),
            ..Default::default()
        };
        assert_eq!(config.server_and_database("Demo"), "localhost/demo");

        config.port = 5433;
        assert_eq!(config.server_and_database("demo"), "localhost:5433/demo");
    }
}
