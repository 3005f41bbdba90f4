//! Error types for the job orchestration core.

use super::record::JobId;
use super::state::JobState;
use super::transfer::TransferId;
use thiserror::Error;

/// A state-machine violation.
///
/// These indicate a code defect or a race that bypassed the state checks;
/// they are always raised and never silently clamped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The requested edge is not part of the lifecycle graph.
    #[error("cannot transition job from {from} to {to}")]
    Illegal { from: JobState, to: JobState },

    /// A transfer completion was reported for a transfer that is not
    /// pending on the job - a detectable double completion.
    #[error("transfer {transfer_id} is not pending on job {job_id}")]
    UnknownTransfer {
        job_id: JobId,
        transfer_id: TransferId,
    },
}

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store lock could not be acquired within the bounded timeout.
    ///
    /// Transient: the critical section either completed atomically or did
    /// not start, so callers may simply retry.
    #[error("timed out acquiring the store lock")]
    Busy,

    /// A record mutation violated the lifecycle state machine.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The caller-supplied completion hook failed; the job was not
    /// transitioned to Completed.
    #[error("job completion hook failed: {0}")]
    Completion(#[from] HandlerError),
}

/// Failure reported by a [`RecursiveJobHandler`](super::RecursiveJobHandler).
///
/// Returning an error is the handler's sole error-signaling mechanism; the
/// orchestrator converts it into a terminal job error with a descriptive
/// summary.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}
