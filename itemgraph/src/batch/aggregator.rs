//! Per-batch job completion aggregation.
//!
//! As the jobs of a dispatched batch finish, their terminal states arrive
//! as events. The aggregator counts them down per batch and, when every
//! unit of the batch is accounted for, writes the observed states into the
//! batch record, computes the aggregate, and publishes a batch-finished
//! event.
//!
//! Event delivery is at-least-once, so the countdown is keyed: each batch
//! tracker remembers which job ids it has already counted and redelivered
//! events never double-decrement.

use super::record::{aggregate_job_states, BatchId, ProcessingState};
use super::store::{BatchOrderStore, BatchStore};
use crate::events::{EventBus, OrchestrationEvent};
use crate::job::{JobId, JobState};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Countdown state for one dispatched batch.
struct BatchTracker {
    /// Total number of units in the batch.
    expected: usize,

    /// Terminal states observed so far, keyed by job id for idempotent
    /// redelivery handling.
    seen: HashMap<JobId, JobState>,

    /// Units whose job could not be created at dispatch time; they count
    /// toward completion without a job id.
    failed_dispatches: usize,

    /// Whether dispatch has persisted the batch's job ids. Finalization
    /// waits for this: a job can finish while its batch is still being
    /// dispatched, and finalizing then would read a stale batch record.
    armed: bool,
}

impl BatchTracker {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            seen: HashMap::new(),
            failed_dispatches: 0,
            armed: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.armed && self.seen.len() + self.failed_dispatches >= self.expected
    }
}

/// Aggregates job outcomes into batch outcomes.
pub struct JobEventAggregator {
    trackers: DashMap<BatchId, BatchTracker>,
    batch_store: Arc<BatchStore>,
    order_store: Arc<BatchOrderStore>,
    events: EventBus,
}

impl JobEventAggregator {
    /// Creates an aggregator over the given stores and bus.
    pub fn new(
        batch_store: Arc<BatchStore>,
        order_store: Arc<BatchOrderStore>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            trackers: DashMap::new(),
            batch_store,
            order_store,
            events,
        })
    }

    /// Registers the countdown for a batch about to be dispatched.
    ///
    /// Must be called before the first job of the batch is created, so a
    /// fast job cannot finish ahead of its tracker. The countdown stays
    /// unarmed until [`arm_batch`](Self::arm_batch) confirms the batch
    /// record has been persisted with its job ids.
    pub fn track_batch(&self, batch_id: BatchId, expected: usize) {
        debug!(batch_id = %batch_id, expected, "Tracking batch");
        self.trackers.insert(batch_id, BatchTracker::new(expected));
    }

    /// Arms the countdown once dispatch has persisted the batch record.
    ///
    /// Finalizes immediately when every unit already finished while the
    /// batch was still being dispatched.
    pub fn arm_batch(&self, batch_id: &BatchId) {
        let ready = {
            let Some(mut tracker) = self.trackers.get_mut(batch_id) else {
                warn!(batch_id = %batch_id, "Arming untracked batch");
                return;
            };
            tracker.armed = true;
            tracker.is_complete()
        };
        if ready {
            self.finalize(batch_id);
        }
    }

    /// Accounts one unit whose job could not be created at dispatch time.
    pub fn record_dispatch_failure(&self, batch_id: &BatchId) {
        let ready = {
            let Some(mut tracker) = self.trackers.get_mut(batch_id) else {
                warn!(batch_id = %batch_id, "Dispatch failure for untracked batch");
                return;
            };
            tracker.failed_dispatches += 1;
            tracker.is_complete()
        };
        if ready {
            self.finalize(batch_id);
        }
    }

    /// Runs the aggregation loop until cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut events = self.events.subscribe();
        info!("Job event aggregator started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    break;
                }

                received = events.recv() => match received {
                    Ok(OrchestrationEvent::JobProcessingFinished {
                        job_id,
                        state,
                        batch_id: Some(batch_id),
                        ..
                    }) => {
                        self.on_job_finished(batch_id, job_id, state);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Job event aggregator lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                },
            }
        }

        info!("Job event aggregator stopped");
    }

    /// Counts one finished job towards its batch.
    fn on_job_finished(&self, batch_id: BatchId, job_id: JobId, state: JobState) {
        let ready = {
            let Some(mut tracker) = self.trackers.get_mut(&batch_id) else {
                debug!(
                    batch_id = %batch_id,
                    job_id = %job_id,
                    "Finished job for untracked batch (already finalized or foreign)"
                );
                return;
            };
            if tracker.seen.contains_key(&job_id) {
                debug!(batch_id = %batch_id, job_id = %job_id, "Duplicate finished event ignored");
                return;
            }
            tracker.seen.insert(job_id, state);
            info!(
                batch_id = %batch_id,
                job_id = %job_id,
                state = %state,
                counted = tracker.seen.len() + tracker.failed_dispatches,
                expected = tracker.expected,
                "Job finished"
            );
            tracker.is_complete()
        };

        if ready {
            self.finalize(&batch_id);
        }
    }

    /// Finalizes the batch once every unit is accounted for.
    ///
    /// Removing the tracker first makes finalization race-free: only one
    /// caller observes the removal and proceeds.
    fn finalize(&self, batch_id: &BatchId) {
        let Some((_, tracker)) = self.trackers.remove(batch_id) else {
            return;
        };

        let mut batch = match self.batch_store.find(batch_id) {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                error!(batch_id = %batch_id, "Cannot finalize batch: not found");
                return;
            }
            Err(err) => {
                error!(batch_id = %batch_id, %err, "Cannot finalize batch");
                return;
            }
        };

        for progress in &mut batch.job_progress {
            if let Some(job_id) = progress.job_id {
                if let Some(state) = tracker.seen.get(&job_id) {
                    progress.job_state = Some(*state);
                }
            }
        }

        let batch_state = aggregate_job_states(
            batch
                .job_progress
                .iter()
                .map(|progress| progress.job_state),
        );
        batch.state = batch_state;
        batch.completed_on = Some(Utc::now());

        let completed_jobs = batch
            .job_progress
            .iter()
            .filter(|p| p.job_state == Some(JobState::Completed))
            .count();
        let total_jobs = batch.job_progress.len();
        let order_id = batch.order_id;
        let batch_number = batch.batch_number;

        if let Err(err) = self.batch_store.save(batch) {
            error!(batch_id = %batch_id, %err, "Cannot persist finalized batch");
            return;
        }

        let order_state = match self.order_store.find(&order_id) {
            Ok(Some(order)) => order.state,
            _ => ProcessingState::Processing,
        };

        info!(
            batch_id = %batch_id,
            order_id = %order_id,
            state = %batch_state,
            completed_jobs,
            total_jobs,
            "Batch finished"
        );
        self.events.publish(OrchestrationEvent::BatchProcessingFinished {
            order_id,
            batch_id: *batch_id,
            order_state,
            batch_state,
            batch_number,
            detail: Some(format!("{completed_jobs}/{total_jobs} jobs completed")),
        });
    }
}
