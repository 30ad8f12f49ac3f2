//! Cooperative single-writer project lock
//!
//! The lock is a flag inside the project's metadata comment, not a
//! database-native lock. Interactive sessions acquire it on open and
//! release it on close; headless runs skip it entirely so batch and
//! automation consumers can share a project. A stale lock left by a
//! crashed session is never cleared automatically: the next interactive
//! open sees `locked=true` and refuses unless it is itself a reconnect.

use tabula_core::{Result, TabulaError};

use crate::DbSession;

/// Coordinates lock acquisition and release around open/close.
#[derive(Debug, Default)]
pub struct LockCoordinator;

impl LockCoordinator {
    /// Decide whether an open may proceed given the project's current lock
    /// flag. Headless runs and reconnects always proceed; an interactive
    /// first open of a locked project is refused.
    pub fn check_open(
        &self,
        locked: bool,
        reconnect: bool,
        headless: bool,
        database: &str,
    ) -> Result<()> {
        if headless || reconnect || !locked {
            return Ok(());
        }
        Err(TabulaError::LockConflict(format!(
            "project database '{database}' is locked by another session"
        )))
    }

    /// Mark the project locked after a successful interactive open.
    pub async fn acquire(&self, session: &DbSession, database: &str) -> Result<()> {
        if session.config().headless {
            tracing::debug!(database, "headless session; project left unlocked");
            return Ok(());
        }
        session.set_lock_status(database, true).await
    }

    /// Clear the lock flag; called before the connection is closed.
    pub async fn release(&self, session: &DbSession, database: &str) -> Result<()> {
        if session.config().headless {
            return Ok(());
        }
        session.set_lock_status(database, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionConfig;
    use std::sync::Arc;
    use tabula_core::LogReporter;

    #[test]
    fn test_check_open_refuses_locked_project() {
        let result = LockCoordinator.check_open(true, false, false, "demo");
        match result {
            Err(TabulaError::LockConflict(message)) => {
                assert!(message.contains("demo"));
            }
            other => panic!("expected lock conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_check_open_allows_reconnect_and_unlocked() {
        assert!(LockCoordinator.check_open(true, true, false, "demo").is_ok());
        assert!(LockCoordinator.check_open(false, false, false, "demo").is_ok());
        assert!(LockCoordinator.check_open(false, true, false, "demo").is_ok());
    }

    #[test]
    fn test_check_open_skips_in_headless_mode() {
        assert!(LockCoordinator.check_open(true, false, true, "demo").is_ok());
    }

    #[tokio::test]
    async fn test_headless_session_skips_lock_acquire_and_release() {
        // No live connection exists, so these would fail if they touched
        // the metadata comment at all.
        let config = SessionConfig {
            user: "batch".into(),
            headless: true,
            ..Default::default()
        };
        let session = DbSession::new(config, Arc::new(LogReporter));

        assert!(LockCoordinator.acquire(&session, "demo").await.is_ok());
        assert!(LockCoordinator.release(&session, "demo").await.is_ok());
    }

    #[tokio::test]
    async fn test_interactive_acquire_requires_connection() {
        let config = SessionConfig {
            user: "alice".into(),
            ..Default::default()
        };
        let session = DbSession::new(config, Arc::new(LogReporter));

        assert!(LockCoordinator.acquire(&session, "demo").await.is_err());
    }
}
