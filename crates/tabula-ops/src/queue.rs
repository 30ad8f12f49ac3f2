//! Background work queue for long-running operations.

use async_trait::async_trait;
use tabula_core::{Result, TabulaError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A unit of background work. Jobs run one at a time in submission
/// order; `on_complete` fires on the worker after `execute` returns.
#[async_trait]
pub trait Job: Send + 'static {
    fn name(&self) -> &str;

    async fn execute(&mut self) -> Result<()>;

    fn on_complete(&mut self, _result: &Result<()>) {}
}

/// Serial executor backed by a spawned worker task. Submitting never
/// blocks the caller.
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<Box<dyn Job>>,
    worker: JoinHandle<()>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Box<dyn Job>>();
        let worker = tokio::spawn(async move {
            while let Some(mut job) = receiver.recv().await {
                let name = job.name().to_string();
                tracing::debug!(job = %name, "starting background job");
                let result = job.execute().await;
                if let Err(err) = &result {
                    tracing::error!(job = %name, %err, "background job failed");
                }
                job.on_complete(&result);
            }
        });
        Self { sender, worker }
    }

    pub fn submit(&self, job: Box<dyn Job>) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|_| TabulaError::Process("work queue is shut down".into()))
    }

    /// Stop accepting work and wait for queued jobs to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.worker.await;
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingJob {
        id: usize,
        order: Arc<parking_lot::Mutex<Vec<usize>>>,
        completions: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Job for RecordingJob {
        fn name(&self) -> &str {
            "recording"
        }

        async fn execute(&mut self) -> Result<()> {
            self.order.lock().push(self.id);
            if self.fail {
                Err(TabulaError::Process("boom".into()))
            } else {
                Ok(())
            }
        }

        fn on_complete(&mut self, _result: &Result<()>) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let queue = WorkQueue::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));

        for id in 0..4 {
            queue
                .submit(Box::new(RecordingJob {
                    id,
                    order: order.clone(),
                    completions: completions.clone(),
                    fail: id == 2,
                }))
                .unwrap();
        }
        queue.shutdown().await;

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(completions.load(Ordering::SeqCst), 4);
    }
}
