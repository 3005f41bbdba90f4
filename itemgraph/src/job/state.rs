//! Job lifecycle state machine.
//!
//! The machine is intentionally linear with two escape hatches (`Error`,
//! `Canceled`) so every code path that mutates a job can be checked against
//! a small edge set, and stale or duplicate asynchronous callbacks can be
//! detected by inspecting the current state before acting:
//!
//! ```text
//! Unsaved → Initial → Running → TransfersFinished → Completed
//!              │         │              │
//!              │         │              └────→ Error
//!              │         ├────→ Error
//!              ├────→ Error        (also Canceled from Unsaved,
//!              └────→ Canceled      Initial and Running)
//! ```
//!
//! Transitions are a pure function over an immutable value: callers obtain
//! the next state via [`JobState::transition_to`] and apply it copy-on-write
//! to the owning record. Illegal pairs always return an error, never clamp.

use super::error::TransitionError;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a recursive job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Constructed but not yet persisted.
    #[default]
    Unsaved,

    /// Persisted, no transfers attached yet.
    Initial,

    /// At least one transfer has been attached.
    Running,

    /// The last pending transfer has completed; finalization pending.
    TransfersFinished,

    /// Finalization succeeded.
    Completed,

    /// A handler or transfer start failed; error detail is recorded.
    Error,

    /// Explicitly canceled before completion.
    Canceled,
}

impl JobState {
    /// Returns true if this is a terminal state (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Canceled)
    }

    /// Returns true if the job is still in flight (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Computes the transition from `self` to `target`.
    ///
    /// Returns the new state when the edge is part of the lifecycle graph,
    /// or [`TransitionError::Illegal`] identifying both states otherwise.
    /// `Running → Running` is a legal self-edge so that attaching a transfer
    /// to an already-running job is idempotent.
    pub fn transition_to(self, target: JobState) -> Result<JobState, TransitionError> {
        let allowed_sources: &[JobState] = match target {
            Self::Unsaved => &[],
            Self::Initial => &[Self::Unsaved],
            Self::Running => &[Self::Initial, Self::Running],
            Self::TransfersFinished => &[Self::Running],
            Self::Completed => &[Self::TransfersFinished, Self::Initial],
            Self::Error => &[Self::Initial, Self::Running, Self::TransfersFinished],
            Self::Canceled => &[Self::Unsaved, Self::Initial, Self::Running],
        };

        if allowed_sources.contains(&self) {
            Ok(target)
        } else {
            Err(TransitionError::Illegal {
                from: self,
                to: target,
            })
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsaved => write!(f, "Unsaved"),
            Self::Initial => write!(f, "Initial"),
            Self::Running => write!(f, "Running"),
            Self::TransfersFinished => write!(f, "TransfersFinished"),
            Self::Completed => write!(f, "Completed"),
            Self::Error => write!(f, "Error"),
            Self::Canceled => write!(f, "Canceled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [JobState; 7] = [
        JobState::Unsaved,
        JobState::Initial,
        JobState::Running,
        JobState::TransfersFinished,
        JobState::Completed,
        JobState::Error,
        JobState::Canceled,
    ];

    /// The complete set of legal edges, as (from, to) pairs.
    const LEGAL_EDGES: [(JobState, JobState); 12] = [
        (JobState::Unsaved, JobState::Initial),
        (JobState::Unsaved, JobState::Canceled),
        (JobState::Initial, JobState::Running),
        (JobState::Initial, JobState::Completed),
        (JobState::Initial, JobState::Error),
        (JobState::Initial, JobState::Canceled),
        (JobState::Running, JobState::Running),
        (JobState::Running, JobState::TransfersFinished),
        (JobState::Running, JobState::Error),
        (JobState::Running, JobState::Canceled),
        (JobState::TransfersFinished, JobState::Completed),
        (JobState::TransfersFinished, JobState::Error),
    ];

    #[test]
    fn test_every_state_pair_matches_the_edge_set() {
        for from in ALL_STATES {
            for to in ALL_STATES {
                let legal = LEGAL_EDGES.contains(&(from, to));
                let result = from.transition_to(to);
                assert_eq!(
                    result.is_ok(),
                    legal,
                    "transition {from} -> {to} expected legal={legal}, got {result:?}"
                );
            }
        }
    }

    #[test]
    fn test_illegal_transition_reports_both_states() {
        let err = JobState::Completed
            .transition_to(JobState::Running)
            .unwrap_err();
        match err {
            TransitionError::Illegal { from, to } => {
                assert_eq!(from, JobState::Completed);
                assert_eq!(to, JobState::Running);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_running_self_edge_is_legal() {
        assert_eq!(
            JobState::Running.transition_to(JobState::Running).unwrap(),
            JobState::Running
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(!JobState::Unsaved.is_terminal());
        assert!(!JobState::Initial.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::TransfersFinished.is_terminal());
    }

    #[test]
    fn test_no_transition_out_of_terminal_states() {
        for from in [JobState::Completed, JobState::Error, JobState::Canceled] {
            for to in ALL_STATES {
                assert!(
                    from.transition_to(to).is_err(),
                    "terminal state {from} must not transition to {to}"
                );
            }
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(format!("{}", JobState::TransfersFinished), "TransfersFinished");
        assert_eq!(format!("{}", JobState::Running), "Running");
    }
}
