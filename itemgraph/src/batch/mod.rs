//! Batch and order orchestration.
//!
//! Composes many jobs into one caller-facing outcome:
//!
//! - [`BatchOrderService`] splits a request into numbered batches and
//!   announces the order.
//! - [`BatchOrderEventListener`] dispatches the batches strictly in
//!   sequence, fanning each batch out over a bounded worker pool and
//!   arming timeouts.
//! - [`JobEventAggregator`] counts finished jobs down per batch - keyed by
//!   job id, so at-least-once event delivery never double-counts - and
//!   publishes the batch outcome.
//! - Job outcomes aggregate into a batch [`ProcessingState`], batch
//!   outcomes into the order state, with the same precedence at both
//!   levels.

mod aggregator;
mod listener;
mod record;
mod service;
mod store;
mod timeouts;

pub use aggregator::JobEventAggregator;
pub use listener::{BatchJobLauncher, BatchOrderEventListener, LaunchError};
pub use record::{
    aggregate_batch_states, aggregate_job_states, Batch, BatchId, BatchOrder, JobProgress,
    JobType, OrderId, ProcessingState,
};
pub use service::{BatchOrderService, RegisterBatchOrder};
pub use store::{BatchOrderStore, BatchStore};
pub use timeouts::{NullTimeoutScheduler, TimeoutScheduler, TokioTimeoutScheduler};
