//! Job orchestration engine.
//!
//! The [`JobOrchestrator`] turns a parameterized request into a running job
//! and drives it, via the pluggable [`RecursiveJobHandler`], through
//! recursive expansion to completion:
//!
//! 1. `start_job` creates the record and asks the handler for the initial
//!    work-items, starting one transfer per item.
//! 2. As transfers complete, [`JobOrchestrator::transfer_completed`]
//!    (invoked by the completion dispatcher) asks the handler whether
//!    further transfers must be started - the recursion step.
//! 3. When no transfers remain pending, the job is finalized through the
//!    store's completion hook, and a finished event is published.
//!
//! Completions may arrive late, duplicated and out of order; the first two
//! steps of `transfer_completed` (ownership lookup, running-state check)
//! make the path fully idempotent. Transfer-start failures never shrink a
//! result set silently: the first non-Ok start aborts the remaining
//! work-items of that step and puts the job into a terminal, inspectable
//! error state.

use super::dispatch::CompletionDispatcher;
use super::error::StoreError;
use super::handler::RecursiveJobHandler;
use super::record::{IdentificationKey, JobId, JobParameters, JobRecord};
use super::state::JobState;
use super::store::{JobStore, JobStoreBackend};
use super::transfer::{
    CompletionSender, ResponseStatus, TransferProcess, TransferProcessManager,
};
use crate::batch::BatchId;
use crate::config::JobTtl;
use crate::events::{EventBus, OrchestrationEvent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default interval between retention sweeps (5 minutes).
pub const DEFAULT_RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Outcome of a job start request.
#[derive(Clone, Debug)]
pub struct JobInitiateResponse {
    /// Identifier of the created job. The record stays inspectable in the
    /// store even when the start failed.
    pub job_id: JobId,

    /// Start outcome; anything other than `Ok` means the job ended in a
    /// terminal error state.
    pub status: ResponseStatus,

    /// Failure description when the status is not `Ok`.
    pub error: Option<String>,
}

impl JobInitiateResponse {
    fn ok(job_id: JobId) -> Self {
        Self {
            job_id,
            status: ResponseStatus::Ok,
            error: None,
        }
    }

    fn failed(job_id: JobId, status: ResponseStatus, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            error: Some(error.into()),
        }
    }
}

/// Cancellation seam used by components that only need to cancel jobs,
/// such as the timeout scheduler.
pub trait JobCanceller: Send + Sync + 'static {
    /// Cancels the job if it is still active; benign for terminal jobs.
    fn cancel(&self, job_id: &JobId);
}

/// Drives recursive jobs from creation to completion.
pub struct JobOrchestrator<B, H, M>
where
    B: JobStoreBackend,
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    store: Arc<JobStore<B>>,
    handler: Arc<H>,
    manager: Arc<M>,
    events: EventBus,
    ttl: JobTtl,
    completions: CompletionSender,
}

impl<B, H, M> JobOrchestrator<B, H, M>
where
    B: JobStoreBackend,
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    /// Creates an orchestrator together with its completion dispatcher.
    ///
    /// The dispatcher owns the receiving half of the completion channel and
    /// must be spawned (`dispatcher.run(shutdown)`) for transfer
    /// completions to be processed.
    pub fn new(
        store: Arc<JobStore<B>>,
        handler: Arc<H>,
        manager: Arc<M>,
        events: EventBus,
        ttl: JobTtl,
    ) -> (Arc<Self>, CompletionDispatcher<B, H, M>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self {
            store,
            handler,
            manager,
            events,
            ttl,
            completions: CompletionSender::new(completion_tx),
        });
        let dispatcher = CompletionDispatcher::new(Arc::clone(&orchestrator), completion_rx);
        (orchestrator, dispatcher)
    }

    /// Returns the store this orchestrator operates on.
    pub fn store(&self) -> &Arc<JobStore<B>> {
        &self.store
    }

    /// Starts a new recursive job.
    ///
    /// Creates and persists the record, asks the handler for the initial
    /// work-items and starts one transfer per item. The first work-item
    /// whose transfer does not start aborts the rest: the job is marked
    /// failed and the transfer backend's status is handed back to the
    /// caller. A job with no initial work-items is finalized immediately.
    ///
    /// After creation the record is the source of truth for the outcome;
    /// later failures surface on the job, not to this caller.
    pub fn start_job(
        &self,
        key: IdentificationKey,
        parameters: JobParameters,
        batch_id: Option<BatchId>,
    ) -> JobInitiateResponse {
        let record = JobRecord::new(key, parameters, batch_id);
        let job_id = record.job_id();

        if let Err(err) = self.store.create(record) {
            error!(job_id = %job_id, %err, "Failed to create job");
            return JobInitiateResponse::failed(job_id, ResponseStatus::FatalError, err.to_string());
        }

        let job = match self.store.find(&job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!(job_id = %job_id, "Job vanished right after creation");
                return JobInitiateResponse::failed(
                    job_id,
                    ResponseStatus::FatalError,
                    "job not found after creation",
                );
            }
            Err(err) => {
                error!(job_id = %job_id, %err, "Failed to read back created job");
                return JobInitiateResponse::failed(
                    job_id,
                    ResponseStatus::FatalError,
                    err.to_string(),
                );
            }
        };

        let requests = match self.handler.initiate(&job) {
            Ok(requests) => requests,
            Err(err) => {
                self.fail_job(&job_id, "handler initiation failed", &err.to_string());
                return JobInitiateResponse::failed(
                    job_id,
                    ResponseStatus::FatalError,
                    err.to_string(),
                );
            }
        };

        if requests.is_empty() {
            // Nothing to wait for; the job is already complete.
            debug!(job_id = %job_id, "Handler produced no work-items; finalizing immediately");
            return match self.finalize_job(&job_id) {
                Ok(()) => JobInitiateResponse::ok(job_id),
                Err(detail) => {
                    JobInitiateResponse::failed(job_id, ResponseStatus::FatalError, detail)
                }
            };
        }

        match self.start_transfers(&job_id, requests) {
            Ok(started) => {
                info!(job_id = %job_id, transfers = started, "Job started");
                JobInitiateResponse::ok(job_id)
            }
            Err(status) => {
                self.fail_job(&job_id, "transfer start failed", &status.to_string());
                JobInitiateResponse::failed(
                    job_id,
                    status,
                    format!("transfer start returned {status}"),
                )
            }
        }
    }

    /// Handles one completed transfer.
    ///
    /// Invoked by the completion dispatcher, any number of times, for any
    /// transfer, in any order. Completions for unknown transfers and for
    /// jobs no longer running are harmless no-ops, which makes redelivery
    /// and races with cancellation safe.
    pub fn transfer_completed(&self, process: TransferProcess) {
        let job = match self.store.find_by_process_id(process.id()) {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!(
                    transfer_id = %process.id(),
                    "No job found for completed transfer (stale or duplicate completion)"
                );
                return;
            }
            Err(err) => {
                error!(transfer_id = %process.id(), %err, "Could not look up job for transfer");
                return;
            }
        };
        let job_id = job.job_id();

        if job.state() != JobState::Running {
            info!(
                job_id = %job_id,
                state = %job.state(),
                transfer_id = %process.id(),
                "Ignoring transfer completion for job no longer running"
            );
            return;
        }

        let requests = match self.handler.recurse(&job, &process) {
            Ok(requests) => requests,
            Err(err) => {
                self.fail_job(&job_id, "handler recursion failed", &err.to_string());
                return;
            }
        };

        match self.start_transfers(&job_id, requests) {
            Ok(0) => {}
            Ok(started) => debug!(job_id = %job_id, transfers = started, "Started next-level transfers"),
            Err(status) => {
                self.fail_job(&job_id, "failed to start a transfer", &status.to_string());
                return;
            }
        }

        if let Err(err) = self.store.complete_transfer_process(&job_id, process) {
            error!(job_id = %job_id, %err, "Could not record transfer completion");
            return;
        }

        // Finalizes only once the last pending transfer has completed; the
        // store skips the completion for jobs that are still running.
        let _ = self.finalize_job(&job_id);
    }

    /// Cancels a job.
    ///
    /// Cooperative: transfers already in flight keep running, and their
    /// eventual completions are ignored. Publishes a finished event so
    /// batch aggregation observes the cancellation.
    pub fn cancel_job(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let record = self.store.cancel_job(job_id)?;
        if let Some(job) = &record {
            if job.state() == JobState::Canceled {
                self.events.publish(OrchestrationEvent::JobProcessingFinished {
                    job_id: *job_id,
                    state: JobState::Canceled,
                    detail: None,
                    batch_id: job.batch_id(),
                });
            }
        }
        Ok(record)
    }

    /// Deletes completed jobs older than the completed-job TTL.
    pub fn cleanup_completed_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.cleanup_expired(JobState::Completed, self.ttl.completed)
    }

    /// Deletes failed jobs older than the failed-job TTL.
    pub fn cleanup_failed_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.cleanup_expired(JobState::Error, self.ttl.failed)
    }

    fn cleanup_expired(
        &self,
        state: JobState,
        ttl: Duration,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let cutoff = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl));
        let Some(cutoff) = cutoff else {
            return Ok(Vec::new());
        };

        let expired = self.store.find_by_state_and_completed_before(state, cutoff)?;
        let mut deleted = Vec::with_capacity(expired.len());
        for job in expired {
            if let Some(removed) = self.store.delete_job(&job.job_id())? {
                deleted.push(removed);
            }
        }
        if !deleted.is_empty() {
            info!(count = deleted.len(), state = %state, "Deleted expired jobs");
        }
        Ok(deleted)
    }

    /// Starts one transfer per work-item, aborting on the first rejection.
    ///
    /// Returns the number of started transfers, or the rejecting status.
    /// Work-items after a rejection are never issued.
    fn start_transfers(
        &self,
        job_id: &JobId,
        requests: Vec<H::Request>,
    ) -> Result<usize, ResponseStatus> {
        let mut started = 0;
        for request in requests {
            let response = self
                .manager
                .initiate_request(request, self.completions.clone());

            if response.status != ResponseStatus::Ok {
                warn!(job_id = %job_id, status = %response.status, "Transfer did not start; aborting remaining work-items");
                return Err(response.status);
            }

            let Some(transfer_id) = response.transfer_id else {
                error!(job_id = %job_id, "Transfer backend reported Ok without a transfer id");
                return Err(ResponseStatus::FatalError);
            };

            if let Err(err) = self.store.add_transfer_process(job_id, transfer_id) {
                error!(job_id = %job_id, %err, "Failed to record started transfer");
                return Err(ResponseStatus::FatalError);
            }
            started += 1;
        }
        Ok(started)
    }

    /// Completes the job through the store's finalization hook.
    ///
    /// The hook invokes the handler's result assembly; a hook failure
    /// converts into a terminal job error instead of a completion.
    fn finalize_job(&self, job_id: &JobId) -> Result<(), String> {
        let result = self
            .store
            .complete_job(job_id, |job| self.handler.complete(job));

        match result {
            Ok(()) => {
                self.publish_if_finished(job_id);
                Ok(())
            }
            Err(StoreError::Completion(err)) => {
                self.fail_job(job_id, "handler completion failed", &err.to_string());
                Err(err.to_string())
            }
            Err(err) => {
                error!(job_id = %job_id, %err, "Failed to finalize job");
                Err(err.to_string())
            }
        }
    }

    /// Marks the job failed and publishes the finished event.
    fn fail_job(&self, job_id: &JobId, summary: &str, detail: &str) {
        if let Err(err) = self.store.mark_job_in_error(job_id, summary, detail) {
            error!(job_id = %job_id, %err, "Failed to mark job in error");
        }
        self.publish_if_finished(job_id);
    }

    /// Publishes a finished event when the job reached Completed or Error.
    fn publish_if_finished(&self, job_id: &JobId) {
        let job = match self.store.find(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "Cannot publish finished event: job not present");
                return;
            }
            Err(err) => {
                warn!(job_id = %job_id, %err, "Cannot publish finished event");
                return;
            }
        };

        match job.state() {
            JobState::Completed | JobState::Error => {
                info!(job_id = %job_id, state = %job.state(), "Job finished");
                self.events.publish(OrchestrationEvent::JobProcessingFinished {
                    job_id: *job_id,
                    state: job.state(),
                    detail: job.error().map(|e| e.summary.clone()),
                    batch_id: job.batch_id(),
                });
            }
            state => {
                debug!(job_id = %job_id, %state, "Job not finished; no event published");
            }
        }
    }
}

impl<B, H, M> JobCanceller for JobOrchestrator<B, H, M>
where
    B: JobStoreBackend,
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    fn cancel(&self, job_id: &JobId) {
        if let Err(err) = self.cancel_job(job_id) {
            warn!(job_id = %job_id, %err, "Failed to cancel job");
        }
    }
}

/// Periodic retention sweep over terminal jobs.
///
/// Runs until cancelled, deleting completed and failed jobs whose TTL has
/// expired.
pub struct RetentionSweeper<B, H, M>
where
    B: JobStoreBackend,
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    orchestrator: Arc<JobOrchestrator<B, H, M>>,
    interval: Duration,
}

impl<B, H, M> RetentionSweeper<B, H, M>
where
    B: JobStoreBackend,
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    /// Creates a sweeper with the given sweep interval.
    pub fn new(orchestrator: Arc<JobOrchestrator<B, H, M>>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Runs the sweeper until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if shutdown.is_cancelled() {
                break;
            }

            if let Err(err) = self.orchestrator.cleanup_completed_jobs() {
                warn!(%err, "Retention sweep over completed jobs failed");
            }
            if let Err(err) = self.orchestrator.cleanup_failed_jobs() {
                warn!(%err, "Retention sweep over failed jobs failed");
            }
        }
    }
}
