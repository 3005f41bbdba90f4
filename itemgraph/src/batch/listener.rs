//! Order-level batch orchestration.
//!
//! The [`BatchOrderEventListener`] reacts to bus events: when an order is
//! registered it dispatches the order's first batch; when a batch finishes
//! it recomputes the order aggregate and either dispatches the next batch
//! or, after the last one, publishes the order-finished event. Batches of
//! an order therefore run strictly in sequence.
//!
//! Dispatching a batch fans its units out over a bounded worker pool. Each
//! worker creates one job through the [`BatchJobLauncher`] seam, records
//! the job id in the batch's progress list, and the whole batch is armed
//! with per-batch and per-job timeouts.

use super::aggregator::JobEventAggregator;
use super::record::{
    aggregate_batch_states, Batch, BatchId, BatchOrder, JobType, OrderId, ProcessingState,
};
use super::store::{BatchOrderStore, BatchStore};
use super::timeouts::TimeoutScheduler;
use crate::config::BatchDispatchConfig;
use crate::events::{EventBus, OrchestrationEvent};
use crate::job::{IdentificationKey, JobId, JobState};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failure to create a job for one unit of a batch.
#[derive(Debug, Clone, Error)]
#[error("failed to launch job for {key}: {reason}")]
pub struct LaunchError {
    /// The identification key the job was meant to traverse from.
    pub key: String,
    /// Why the job could not be created.
    pub reason: String,
}

impl LaunchError {
    /// Creates a launch error for the given key.
    pub fn new(key: &IdentificationKey, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Job-creation seam used by batch dispatch.
///
/// One method per job type; dispatch selects the entry point by matching
/// exhaustively on the order's [`JobType`].
pub trait BatchJobLauncher: Send + Sync + 'static {
    /// Creates a regular item-graph job for one unit of a batch.
    fn register_item_job(
        &self,
        key: &IdentificationKey,
        order: &BatchOrder,
        batch_id: BatchId,
    ) -> Result<JobId, LaunchError>;

    /// Creates an investigation job for one unit of a batch.
    fn register_investigation_job(
        &self,
        key: &IdentificationKey,
        order: &BatchOrder,
        batch_id: BatchId,
    ) -> Result<JobId, LaunchError>;
}

/// Drives orders through their batches in sequence.
pub struct BatchOrderEventListener {
    order_store: Arc<BatchOrderStore>,
    batch_store: Arc<BatchStore>,
    launcher: Arc<dyn BatchJobLauncher>,
    aggregator: Arc<JobEventAggregator>,
    timeouts: Arc<dyn TimeoutScheduler>,
    events: EventBus,
    config: BatchDispatchConfig,
}

impl BatchOrderEventListener {
    /// Creates a listener over the given collaborators.
    pub fn new(
        order_store: Arc<BatchOrderStore>,
        batch_store: Arc<BatchStore>,
        launcher: Arc<dyn BatchJobLauncher>,
        aggregator: Arc<JobEventAggregator>,
        timeouts: Arc<dyn TimeoutScheduler>,
        events: EventBus,
        config: BatchDispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            order_store,
            batch_store,
            launcher,
            aggregator,
            timeouts,
            events,
            config,
        })
    }

    /// Runs the listener until cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut events = self.events.subscribe();
        info!("Batch order listener started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    break;
                }

                received = events.recv() => match received {
                    Ok(OrchestrationEvent::BatchOrderRegistered { order_id }) => {
                        self.on_order_registered(order_id).await;
                    }
                    Ok(OrchestrationEvent::BatchProcessingFinished {
                        order_id,
                        batch_number,
                        ..
                    }) => {
                        self.on_batch_finished(order_id, batch_number).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Batch order listener lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                },
            }
        }

        info!("Batch order listener stopped");
    }

    /// Dispatches the first batch of a freshly registered order.
    async fn on_order_registered(&self, order_id: OrderId) {
        info!(order_id = %order_id, "Order registered");
        let Some(order) = self.load_order(&order_id) else {
            return;
        };

        if order.batch_ids.is_empty() {
            // An order with nothing to do has, by convention, done all of it.
            info!(order_id = %order_id, "Order has no batches; finishing immediately");
            self.persist_order_state(order, ProcessingState::Completed);
            self.events
                .publish(OrchestrationEvent::BatchOrderProcessingFinished {
                    order_id,
                    state: ProcessingState::Completed,
                });
            return;
        }

        match self.batch_store.find_by_order_and_number(&order_id, 1) {
            Ok(Some(batch)) => self.dispatch_batch(&order, batch).await,
            Ok(None) => error!(order_id = %order_id, "First batch of order not found"),
            Err(err) => error!(order_id = %order_id, %err, "Cannot load first batch"),
        }
    }

    /// Advances the order after one of its batches finished.
    async fn on_batch_finished(&self, order_id: OrderId, batch_number: usize) {
        let Some(order) = self.load_order(&order_id) else {
            return;
        };

        let order_state = self.compute_order_state(&order);
        let order = self.persist_order_state(order, order_state);

        if batch_number < order.batch_ids.len() {
            match self
                .batch_store
                .find_by_order_and_number(&order_id, batch_number + 1)
            {
                Ok(Some(next)) => {
                    info!(
                        order_id = %order_id,
                        batch_number = next.batch_number,
                        "Dispatching next batch"
                    );
                    self.dispatch_batch(&order, next).await;
                }
                Ok(None) => {
                    error!(
                        order_id = %order_id,
                        batch_number = batch_number + 1,
                        "Next batch not found"
                    );
                }
                Err(err) => error!(order_id = %order_id, %err, "Cannot load next batch"),
            }
        } else {
            info!(order_id = %order_id, state = %order_state, "Order finished");
            self.events
                .publish(OrchestrationEvent::BatchOrderProcessingFinished {
                    order_id,
                    state: order_state,
                });
        }
    }

    /// Dispatches every unit of `batch` through the bounded worker pool.
    async fn dispatch_batch(&self, order: &BatchOrder, mut batch: Batch) {
        let batch_id = batch.batch_id;
        let total = batch.job_progress.len();

        if total == 0 {
            // Nothing to wait for; the batch is complete by convention.
            info!(batch_id = %batch_id, "Batch has no units; finishing immediately");
            batch.state = ProcessingState::Completed;
            batch.completed_on = Some(Utc::now());
            let batch_number = batch.batch_number;
            if let Err(err) = self.batch_store.save(batch) {
                error!(batch_id = %batch_id, %err, "Cannot persist empty batch");
                return;
            }
            self.events
                .publish(OrchestrationEvent::BatchProcessingFinished {
                    order_id: order.order_id,
                    batch_id,
                    order_state: order.state,
                    batch_state: ProcessingState::Completed,
                    batch_number,
                    detail: Some("0/0 jobs completed".to_string()),
                });
            return;
        }

        // Register the countdown before the first job can possibly finish
        self.aggregator.track_batch(batch_id, total);
        info!(
            batch_id = %batch_id,
            order_id = %order.order_id,
            units = total,
            "Dispatching batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.worker_limit));
        let order_snapshot = Arc::new(order.clone());
        let mut workers: JoinSet<(usize, Result<JobId, LaunchError>)> = JoinSet::new();

        for (index, progress) in batch.job_progress.iter().enumerate() {
            let key = progress.identification_key.clone();
            let launcher = Arc::clone(&self.launcher);
            let order = Arc::clone(&order_snapshot);
            let semaphore = Arc::clone(&semaphore);

            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Err(LaunchError::new(&key, "dispatch pool closed")));
                };
                let result = match order.job_type {
                    JobType::ItemGraph => launcher.register_item_job(&key, &order, batch_id),
                    JobType::Investigation => {
                        launcher.register_investigation_job(&key, &order, batch_id)
                    }
                };
                (index, result)
            });
        }

        let mut job_ids = Vec::with_capacity(total);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, Ok(job_id))) => {
                    batch.job_progress[index].job_id = Some(job_id);
                    batch.job_progress[index].job_state = Some(JobState::Initial);
                    job_ids.push(job_id);
                }
                Ok((index, Err(err))) => {
                    error!(batch_id = %batch_id, %err, "Failed to launch job for batch unit");
                    batch.job_progress[index].job_state = Some(JobState::Error);
                    self.aggregator.record_dispatch_failure(&batch_id);
                }
                Err(join_err) => {
                    error!(batch_id = %batch_id, %join_err, "Batch dispatch worker failed");
                    self.aggregator.record_dispatch_failure(&batch_id);
                }
            }
        }

        batch.state = ProcessingState::Processing;
        batch.started_on = Some(Utc::now());
        if let Err(err) = self.batch_store.save(batch) {
            error!(batch_id = %batch_id, %err, "Cannot persist dispatched batch");
        }

        // Jobs may already have finished while dispatch was still writing
        // job ids; the countdown only finalizes once the record is saved
        self.aggregator.arm_batch(&batch_id);

        self.timeouts.register_batch_timeout(batch_id, order.timeout);
        self.timeouts
            .register_jobs_timeout(job_ids, order.job_timeout);
    }

    fn load_order(&self, order_id: &OrderId) -> Option<BatchOrder> {
        match self.order_store.find(order_id) {
            Ok(Some(order)) => Some(order),
            Ok(None) => {
                warn!(order_id = %order_id, "Order not found");
                None
            }
            Err(err) => {
                error!(order_id = %order_id, %err, "Cannot load order");
                None
            }
        }
    }

    /// Aggregates the order state over all of its batches.
    fn compute_order_state(&self, order: &BatchOrder) -> ProcessingState {
        let states = order
            .batch_ids
            .iter()
            .map(|batch_id| match self.batch_store.find(batch_id) {
                Ok(Some(batch)) => batch.state,
                _ => {
                    debug!(batch_id = %batch_id, "Batch missing while aggregating order state");
                    ProcessingState::Processing
                }
            });
        aggregate_batch_states(states)
    }

    fn persist_order_state(&self, mut order: BatchOrder, state: ProcessingState) -> BatchOrder {
        order.state = state;
        if let Err(err) = self.order_store.save(order.clone()) {
            error!(order_id = %order.order_id, %err, "Cannot persist order state");
        }
        order
    }
}
