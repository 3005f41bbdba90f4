//! Concurrency-safe repository of job records.
//!
//! [`JobStore`] is the sole mutator of [`JobRecord`]s. It enforces the
//! lifecycle state machine and serializes all mutations per store instance
//! behind one coarse reader/writer lock: read lock for pure lookups, write
//! lock for mutations, both with a bounded acquisition timeout. Failing to
//! take the lock in time surfaces as the retryable [`StoreError::Busy`]
//! rather than blocking indefinitely.
//!
//! One lock serializes all jobs of a store instance. Mutation critical
//! sections are in-memory operations in the microsecond range (or a single
//! blob read-modify-write for the durable backend), so the coarse lock
//! favors correctness and auditability without a measurable throughput
//! cost. No operation performs network I/O while holding the lock.
//!
//! Storage is pluggable through [`JobStoreBackend`]: an in-memory map for
//! the default store, or a blob-persisted backend for durability (see
//! [`blob`](super::blob)).

use super::error::{HandlerError, StoreError};
use super::record::{JobId, JobRecord};
use super::state::JobState;
use super::transfer::{TransferId, TransferProcess};
use crate::config::StoreConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Storage seam beneath the [`JobStore`].
///
/// Implementations provide plain keyed access; all locking, state-machine
/// enforcement and contract behavior live in the store itself.
pub trait JobStoreBackend: Send + Sync + 'static {
    /// Returns the record stored under `job_id`, if any.
    fn get(&self, job_id: &JobId) -> Option<JobRecord>;

    /// Stores `record` under its job id, replacing any prior revision.
    fn put(&mut self, record: JobRecord);

    /// Removes and returns the record stored under `job_id`.
    fn remove(&mut self, job_id: &JobId) -> Option<JobRecord>;

    /// Returns all stored records.
    fn all(&self) -> Vec<JobRecord>;
}

/// In-memory backend over a hash map.
#[derive(Default)]
pub struct InMemoryJobStoreBackend {
    jobs: HashMap<JobId, JobRecord>,
}

impl InMemoryJobStoreBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStoreBackend for InMemoryJobStoreBackend {
    fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.get(job_id).cloned()
    }

    fn put(&mut self, record: JobRecord) {
        self.jobs.insert(record.job_id(), record);
    }

    fn remove(&mut self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.remove(job_id)
    }

    fn all(&self) -> Vec<JobRecord> {
        self.jobs.values().cloned().collect()
    }
}

/// Concurrency-safe job repository enforcing lifecycle transitions.
pub struct JobStore<B: JobStoreBackend> {
    backend: RwLock<B>,
    lock_timeout: Duration,
}

impl JobStore<InMemoryJobStoreBackend> {
    /// Creates a store over the in-memory backend.
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::with_backend(InMemoryJobStoreBackend::new(), config)
    }
}

impl<B: JobStoreBackend> JobStore<B> {
    /// Creates a store over the given backend.
    pub fn with_backend(backend: B, config: StoreConfig) -> Self {
        Self {
            backend: RwLock::new(backend),
            lock_timeout: config.lock_timeout,
        }
    }

    /// Point lookup by job id. No side effects.
    pub fn find(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let backend = self.read_lock()?;
        Ok(backend.get(job_id))
    }

    /// Returns all stored jobs.
    pub fn find_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let backend = self.read_lock()?;
        Ok(backend.all())
    }

    /// Returns jobs currently in any of the given states.
    pub fn find_by_states(&self, states: &[JobState]) -> Result<Vec<JobRecord>, StoreError> {
        let backend = self.read_lock()?;
        Ok(backend
            .all()
            .into_iter()
            .filter(|job| states.contains(&job.state()))
            .collect())
    }

    /// Returns jobs in `state` whose completion timestamp is before `cutoff`.
    ///
    /// Used by retention cleanup; jobs without a completion timestamp never
    /// match.
    pub fn find_by_state_and_completed_before(
        &self,
        state: JobState,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let backend = self.read_lock()?;
        Ok(backend
            .all()
            .into_iter()
            .filter(|job| job.state() == state)
            .filter(|job| job.completed_on().is_some_and(|completed| completed < cutoff))
            .collect())
    }

    /// Reverse lookup from an in-flight transfer id to its owning job.
    ///
    /// Only matches jobs where the transfer is still pending; completed or
    /// abandoned transfers no longer resolve, so late callbacks for them
    /// are recognized as stale.
    pub fn find_by_process_id(
        &self,
        transfer_id: &TransferId,
    ) -> Result<Option<JobRecord>, StoreError> {
        let backend = self.read_lock()?;
        Ok(backend
            .all()
            .into_iter()
            .find(|job| job.pending_transfers().contains(transfer_id)))
    }

    /// Inserts a new record, applying the `Unsaved → Initial` transition as
    /// part of the same atomic operation.
    pub fn create(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut backend = self.write_lock()?;
        let registered = record.register()?;
        info!(job_id = %registered.job_id(), key = %registered.key(), "Created job");
        backend.put(registered);
        Ok(())
    }

    /// Adds a pending transfer to the job and moves it to `Running`.
    ///
    /// Unknown job ids are a logged no-op: late registrations for
    /// already-deleted jobs are expected in normal operation.
    pub fn add_transfer_process(
        &self,
        job_id: &JobId,
        transfer_id: TransferId,
    ) -> Result<(), StoreError> {
        debug!(job_id = %job_id, transfer_id = %transfer_id, "Adding transfer process");
        self.modify(job_id, |job| job.attach_transfer(transfer_id))
    }

    /// Records the completion of a pending transfer.
    ///
    /// When the pending set becomes empty the job transitions to
    /// `TransfersFinished` in the same critical section, so the transition
    /// fires exactly once no matter how completions interleave. Completing
    /// a transfer that is not pending raises the illegal-transition
    /// condition (detectable double completion).
    pub fn complete_transfer_process(
        &self,
        job_id: &JobId,
        process: TransferProcess,
    ) -> Result<(), StoreError> {
        debug!(job_id = %job_id, transfer_id = %process.id(), "Completing transfer process");
        self.modify(job_id, |job| {
            let updated = job.complete_transfer(process)?;
            if updated.state() == JobState::TransfersFinished {
                info!(
                    job_id = %updated.job_id(),
                    transfers = updated.completed_transfers().len(),
                    "All transfers finished"
                );
            }
            Ok(updated)
        })
    }

    /// Finalizes a job: runs `on_before_complete` and then applies the
    /// transition to `Completed`.
    ///
    /// The hook is where the external completion handler assembles the
    /// result; it runs inside the critical section and must not perform
    /// network I/O. If the hook fails the job is left untouched and the
    /// failure is returned for the caller to convert into a job error.
    /// Jobs that are neither `TransfersFinished` nor `Initial`, and unknown
    /// job ids, are a logged no-op.
    pub fn complete_job<F>(&self, job_id: &JobId, on_before_complete: F) -> Result<(), StoreError>
    where
        F: FnOnce(&JobRecord) -> Result<(), HandlerError>,
    {
        let mut backend = self.write_lock()?;
        let Some(job) = backend.get(job_id) else {
            warn!(job_id = %job_id, "Cannot complete job: not found");
            return Ok(());
        };

        match job.state() {
            JobState::TransfersFinished | JobState::Initial => {
                on_before_complete(&job)?;
                let completed = job.complete()?;
                info!(job_id = %completed.job_id(), "Job completed");
                backend.put(completed);
                Ok(())
            }
            state => {
                debug!(job_id = %job_id, state = %state, "Job not ready for completion");
                Ok(())
            }
        }
    }

    /// Moves a job to `Error`, recording summary and detail.
    ///
    /// Unknown job ids are a logged no-op.
    pub fn mark_job_in_error(
        &self,
        job_id: &JobId,
        summary: &str,
        detail: &str,
    ) -> Result<(), StoreError> {
        warn!(job_id = %job_id, summary, detail, "Marking job in error");
        let summary = summary.to_string();
        let detail = detail.to_string();
        self.modify(job_id, move |job| job.fail(summary, detail))
    }

    /// Removes a job, returning the prior record.
    pub fn delete_job(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let mut backend = self.write_lock()?;
        let removed = backend.remove(job_id);
        if removed.is_some() {
            info!(job_id = %job_id, "Deleted job");
        }
        Ok(removed)
    }

    /// Applies the `Canceled` transition if it is legal from the job's
    /// current state, returning the resulting record.
    ///
    /// Jobs that already reached a terminal state are returned unchanged;
    /// cancellation is cooperative and racing a natural completion is not
    /// an error. Unknown job ids return `None` with a warning.
    pub fn cancel_job(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let mut backend = self.write_lock()?;
        let Some(job) = backend.get(job_id) else {
            warn!(job_id = %job_id, "Cannot cancel job: not found");
            return Ok(None);
        };

        match job.cancel() {
            Ok(canceled) => {
                info!(job_id = %job_id, "Canceled job");
                backend.put(canceled.clone());
                Ok(Some(canceled))
            }
            Err(err) => {
                debug!(job_id = %job_id, state = %job.state(), %err, "Cancel not applicable");
                Ok(Some(job))
            }
        }
    }

    /// Applies `action` to the stored record under the write lock,
    /// persisting the returned revision. Unknown job ids are a logged
    /// no-op; transition failures propagate.
    fn modify<F>(&self, job_id: &JobId, action: F) -> Result<(), StoreError>
    where
        F: FnOnce(JobRecord) -> Result<JobRecord, super::error::TransitionError>,
    {
        let mut backend = self.write_lock()?;
        match backend.get(job_id) {
            None => {
                warn!(job_id = %job_id, "Job not found");
                Ok(())
            }
            Some(job) => {
                let updated = action(job)?;
                backend.put(updated);
                Ok(())
            }
        }
    }

    fn read_lock(&self) -> Result<parking_lot::RwLockReadGuard<'_, B>, StoreError> {
        self.backend
            .try_read_for(self.lock_timeout)
            .ok_or(StoreError::Busy)
    }

    fn write_lock(&self) -> Result<parking_lot::RwLockWriteGuard<'_, B>, StoreError> {
        self.backend
            .try_write_for(self.lock_timeout)
            .ok_or(StoreError::Busy)
    }
}

impl<B: JobStoreBackend> std::fmt::Debug for JobStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}
