//! Batch and order data model.
//!
//! A batch groups jobs that are dispatched and tracked together; an order
//! groups batches that run strictly in sequence. Aggregate processing
//! states are pure, order-independent functions of the underlying job and
//! batch states.

use crate::job::{IdentificationKey, JobId, JobParameters, JobState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier of a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Creates a fresh random batch id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID as a batch id.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a batch order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a fresh random order id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID as an order id.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregate processing state of a batch or an order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingState {
    /// Registered, nothing dispatched yet.
    #[default]
    Initialized,

    /// At least one underlying unit has not reached a terminal state.
    Processing,

    /// Every unit is terminal, but not all of them completed successfully.
    Partial,

    /// Every unit completed successfully.
    Completed,
}

impl ProcessingState {
    /// Returns true when no further state change is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Partial | Self::Completed)
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "Initialized"),
            Self::Processing => write!(f, "Processing"),
            Self::Partial => write!(f, "Partial"),
            Self::Completed => write!(f, "Completed"),
        }
    }
}

/// Kind of job an order dispatches for each identification key.
///
/// Closed set; dispatch matches exhaustively on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    /// Regular item-graph traversal job.
    #[default]
    ItemGraph,

    /// Incident-investigation job over the same graph.
    Investigation,
}

/// Progress of one unit of work within a batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobProgress {
    /// The root node this unit traverses from.
    pub identification_key: IdentificationKey,

    /// The created job, once the unit has been dispatched.
    pub job_id: Option<JobId>,

    /// Last observed job state; `None` until dispatched.
    pub job_state: Option<JobState>,
}

impl JobProgress {
    /// Creates a not-yet-dispatched progress entry.
    pub fn new(identification_key: IdentificationKey) -> Self {
        Self {
            identification_key,
            job_id: None,
            job_state: None,
        }
    }
}

/// One group of jobs processed together.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Batch {
    /// Unique identifier.
    pub batch_id: BatchId,

    /// Owning order.
    pub order_id: OrderId,

    /// 1-based position within the order.
    pub batch_number: usize,

    /// One entry per unit of work.
    pub job_progress: Vec<JobProgress>,

    /// Aggregate processing state.
    pub state: ProcessingState,

    /// When dispatch started.
    pub started_on: Option<DateTime<Utc>>,

    /// When the aggregate state was finalized.
    pub completed_on: Option<DateTime<Utc>>,
}

impl Batch {
    /// Creates an initialized batch for the given keys.
    pub fn new(order_id: OrderId, batch_number: usize, keys: Vec<IdentificationKey>) -> Self {
        Self {
            batch_id: BatchId::random(),
            order_id,
            batch_number,
            job_progress: keys.into_iter().map(JobProgress::new).collect(),
            state: ProcessingState::Initialized,
            started_on: None,
            completed_on: None,
        }
    }
}

/// One top-level request spanning possibly many batches.
///
/// Batches are processed strictly in sequence: batch *n+1* is not
/// dispatched until batch *n* reached a terminal aggregate state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchOrder {
    /// Unique identifier.
    pub order_id: OrderId,

    /// Batches of the order, in dispatch sequence.
    pub batch_ids: Vec<BatchId>,

    /// Kind of job dispatched for each key.
    pub job_type: JobType,

    /// Shared job parameters for every job of the order.
    pub parameters: JobParameters,

    /// Wall-clock budget per batch.
    pub timeout: Duration,

    /// Wall-clock budget per job.
    pub job_timeout: Duration,

    /// Aggregate processing state over the order's batches.
    pub state: ProcessingState,

    /// Requesting principal.
    pub owner: Option<String>,
}

/// Computes the aggregate state of a set of jobs.
///
/// Order-independent: if every job completed the aggregate is `Completed`;
/// if every job reached some terminal state but not all completed it is
/// `Partial`; any non-terminal job (including not-yet-dispatched entries,
/// given as `None`) keeps the aggregate at `Processing`. An empty set
/// counts as `Completed` - a batch with nothing to do has, by convention,
/// done all of it.
pub fn aggregate_job_states<I>(states: I) -> ProcessingState
where
    I: IntoIterator<Item = Option<JobState>>,
{
    let mut all_completed = true;
    for state in states {
        match state {
            Some(state) if state.is_terminal() => {
                if state != JobState::Completed {
                    all_completed = false;
                }
            }
            _ => return ProcessingState::Processing,
        }
    }
    if all_completed {
        ProcessingState::Completed
    } else {
        ProcessingState::Partial
    }
}

/// Computes the aggregate state of an order from its batches' states.
///
/// Same precedence as [`aggregate_job_states`]: all `Completed` wins, any
/// non-terminal batch keeps the order `Processing`, anything else is
/// `Partial`. An empty order counts as `Completed`.
pub fn aggregate_batch_states<I>(states: I) -> ProcessingState
where
    I: IntoIterator<Item = ProcessingState>,
{
    let mut all_completed = true;
    for state in states {
        if !state.is_terminal() {
            return ProcessingState::Processing;
        }
        if state != ProcessingState::Completed {
            all_completed = false;
        }
    }
    if all_completed {
        ProcessingState::Completed
    } else {
        ProcessingState::Partial
    }
}
