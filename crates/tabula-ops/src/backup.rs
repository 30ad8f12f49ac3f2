//! Bound on concurrent backup and restore jobs.

use std::sync::Arc;
use std::time::Duration;

use tabula_core::{Result, TabulaError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps how many dump/restore child processes run at once. A permit is
/// held for the whole job and released when dropped.
#[derive(Debug, Clone)]
pub struct BackupLimiter {
    semaphore: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl BackupLimiter {
    pub fn new(max_concurrent: usize, acquire_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            acquire_timeout,
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot, up to the configured timeout.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let acquired = tokio::time::timeout(
            self.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await;

        match acquired {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(TabulaError::Process("backup limiter closed".into())),
            Err(_) => Err(TabulaError::Process(format!(
                "timed out waiting for a backup slot (timeout: {:?})",
                self.acquire_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let limiter = BackupLimiter::new(2, Duration::from_millis(50));
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);

        // A third request blocks until a permit is released.
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, TabulaError::Process(_)));

        drop(first);
        let _third = limiter.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let limiter = BackupLimiter::new(1, Duration::from_secs(1));
        {
            let _permit = limiter.acquire().await.unwrap();
            assert_eq!(limiter.available(), 0);
        }
        assert_eq!(limiter.available(), 1);
    }
}
