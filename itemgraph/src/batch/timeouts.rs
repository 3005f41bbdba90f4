//! Wall-clock timeouts for batches and jobs.
//!
//! Timeout registration is fire-and-forget: expiry cancels any still-active
//! job through the [`JobCanceller`] seam, and the cancellation surfaces as
//! an ordinary job-finished event on the same aggregation path as every
//! other failure. Jobs that already reached a terminal state are untouched.

use super::record::BatchId;
use super::store::BatchStore;
use crate::job::{JobCanceller, JobId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Arms per-batch and per-job wall-clock timeouts.
pub trait TimeoutScheduler: Send + Sync + 'static {
    /// Cancels every still-active job of the batch once `after` elapses.
    fn register_batch_timeout(&self, batch_id: BatchId, after: Duration);

    /// Cancels each of the given jobs once `after` elapses, unless it
    /// already reached a terminal state.
    fn register_jobs_timeout(&self, job_ids: Vec<JobId>, after: Duration);
}

/// Timer-task based [`TimeoutScheduler`].
///
/// Each registration spawns a sleeping task; must be used within a running
/// tokio runtime.
pub struct TokioTimeoutScheduler {
    canceller: Arc<dyn JobCanceller>,
    batch_store: Arc<BatchStore>,
}

impl TokioTimeoutScheduler {
    /// Creates a scheduler cancelling through the given seam.
    pub fn new(canceller: Arc<dyn JobCanceller>, batch_store: Arc<BatchStore>) -> Arc<Self> {
        Arc::new(Self {
            canceller,
            batch_store,
        })
    }
}

impl TimeoutScheduler for TokioTimeoutScheduler {
    fn register_batch_timeout(&self, batch_id: BatchId, after: Duration) {
        let canceller = Arc::clone(&self.canceller);
        let batch_store = Arc::clone(&self.batch_store);

        tokio::spawn(async move {
            tokio::time::sleep(after).await;

            let batch = match batch_store.find(&batch_id) {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    warn!(batch_id = %batch_id, "Batch timeout fired for unknown batch");
                    return;
                }
                Err(err) => {
                    warn!(batch_id = %batch_id, %err, "Batch timeout could not load batch");
                    return;
                }
            };

            if batch.state.is_terminal() {
                return;
            }

            info!(batch_id = %batch_id, "Batch timeout expired; cancelling remaining jobs");
            for progress in &batch.job_progress {
                if let Some(job_id) = progress.job_id {
                    canceller.cancel(&job_id);
                }
            }
        });
    }

    fn register_jobs_timeout(&self, job_ids: Vec<JobId>, after: Duration) {
        if job_ids.is_empty() {
            return;
        }
        let canceller = Arc::clone(&self.canceller);

        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            for job_id in &job_ids {
                canceller.cancel(job_id);
            }
        });
    }
}

/// [`TimeoutScheduler`] that never fires.
///
/// For deployments and tests where wall-clock limits are not wanted.
pub struct NullTimeoutScheduler;

impl TimeoutScheduler for NullTimeoutScheduler {
    fn register_batch_timeout(&self, _batch_id: BatchId, _after: Duration) {}

    fn register_jobs_timeout(&self, _job_ids: Vec<JobId>, _after: Duration) {}
}
