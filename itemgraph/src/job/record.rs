//! Job record data model.
//!
//! A [`JobRecord`] is an immutable-per-revision snapshot of one recursive
//! job: its lifecycle state, pending and completed transfers, creation
//! parameters and timestamps. Revisions are produced copy-on-write by the
//! transition helpers on this type; the store is the only component that
//! applies them, under its write lock.

use super::error::TransitionError;
use super::state::JobState;
use super::transfer::{TransferId, TransferProcess};
use crate::batch::BatchId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier of a job, assigned at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a fresh random job id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID as a job id.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identification of the root node a job traverses from.
///
/// Either a global asset id or a digital-twin identifier must be present;
/// the business partner number is optional context for partner lookups.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationKey {
    /// Global asset identifier of the root item.
    pub global_asset_id: Option<String>,

    /// Digital-twin identifier, used when no global asset id is known.
    pub identifier: Option<String>,

    /// Business partner number owning the root item.
    pub bpn: Option<String>,
}

impl IdentificationKey {
    /// Creates a key from a global asset id.
    pub fn from_global_asset_id(id: impl Into<String>) -> Self {
        Self {
            global_asset_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Creates a key from a digital-twin identifier.
    pub fn from_identifier(id: impl Into<String>) -> Self {
        Self {
            identifier: Some(id.into()),
            ..Self::default()
        }
    }

    /// Attaches a business partner number.
    pub fn with_bpn(mut self, bpn: impl Into<String>) -> Self {
        self.bpn = Some(bpn.into());
        self
    }
}

impl std::fmt::Display for IdentificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.global_asset_id, &self.identifier) {
            (Some(global), _) => write!(f, "{global}"),
            (None, Some(identifier)) => write!(f, "{identifier}"),
            (None, None) => write!(f, "<unidentified>"),
        }
    }
}

/// Direction in which the relationship graph is traversed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraversalDirection {
    /// From the root item towards its components.
    #[default]
    Downward,

    /// From the root item towards its assemblies.
    Upward,
}

/// Per-job configuration supplied at creation.
///
/// Immutable after creation: handlers receive it read-only and no API
/// mutates it mid-flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    /// Maximum traversal depth from the root item.
    pub depth: u32,

    /// Traversal direction.
    pub direction: TraversalDirection,

    /// Aspect models to collect for each visited item.
    pub aspects: Vec<String>,

    /// Whether aspect payloads are collected, or only the relationship tree.
    pub collect_aspects: bool,

    /// Whether business partner numbers are resolved for visited items.
    pub lookup_bpns: bool,

    /// Address notified when the job finishes, if any.
    pub callback_url: Option<String>,
}

impl JobParameters {
    /// Sets the traversal depth.
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Sets the traversal direction.
    pub fn with_direction(mut self, direction: TraversalDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Sets the collected aspect models.
    pub fn with_aspects(mut self, aspects: Vec<String>) -> Self {
        self.aspects = aspects;
        self
    }
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            depth: 1,
            direction: TraversalDirection::Downward,
            aspects: Vec::new(),
            collect_aspects: false,
            lookup_bpns: false,
            callback_url: None,
        }
    }
}

/// Error details recorded when a job enters the Error state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrorDetail {
    /// Short human-readable summary of what failed.
    pub summary: String,

    /// Free-form detail, typically the underlying error rendered as text.
    pub detail: String,

    /// When the error occurred.
    pub occurred_on: DateTime<Utc>,
}

/// Snapshot of one recursive job.
///
/// State is mutated exclusively through the transition helpers, each of
/// which runs the lifecycle state machine and returns a new revision.
/// `completed_on` is set exactly once, when the first terminal state is
/// reached. Whenever the state is `TransfersFinished`, `Completed`,
/// `Error` or `Canceled` the pending transfer set is empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    job_id: JobId,
    state: JobState,
    key: IdentificationKey,
    parameters: JobParameters,
    batch_id: Option<BatchId>,
    pending_transfers: BTreeSet<TransferId>,
    completed_transfers: Vec<TransferProcess>,
    error: Option<JobErrorDetail>,
    created_on: DateTime<Utc>,
    last_modified_on: DateTime<Utc>,
    completed_on: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a new unsaved job record.
    pub fn new(
        key: IdentificationKey,
        parameters: JobParameters,
        batch_id: Option<BatchId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::random(),
            state: JobState::Unsaved,
            key,
            parameters,
            batch_id,
            pending_transfers: BTreeSet::new(),
            completed_transfers: Vec::new(),
            error: None,
            created_on: now,
            last_modified_on: now,
            completed_on: None,
        }
    }

    /// Returns the job id.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Returns the root node identification.
    pub fn key(&self) -> &IdentificationKey {
        &self.key
    }

    /// Returns the creation parameters.
    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    /// Returns the owning batch, if the job was dispatched by the batch layer.
    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    /// Returns the identifiers of transfers still in flight.
    pub fn pending_transfers(&self) -> &BTreeSet<TransferId> {
        &self.pending_transfers
    }

    /// Returns the completed transfers, in completion order.
    pub fn completed_transfers(&self) -> &[TransferProcess] {
        &self.completed_transfers
    }

    /// Returns the recorded error details, if the job failed.
    pub fn error(&self) -> Option<&JobErrorDetail> {
        self.error.as_ref()
    }

    /// Returns when the record was created.
    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    /// Returns when the record was last modified.
    pub fn last_modified_on(&self) -> DateTime<Utc> {
        self.last_modified_on
    }

    /// Returns when the job reached a terminal state, if it has.
    pub fn completed_on(&self) -> Option<DateTime<Utc>> {
        self.completed_on
    }

    /// Transitions the record into the store (`Unsaved → Initial`).
    pub fn register(mut self) -> Result<Self, TransitionError> {
        self.state = self.state.transition_to(JobState::Initial)?;
        self.touch();
        Ok(self)
    }

    /// Attaches an in-flight transfer and moves the job to `Running`.
    ///
    /// Idempotent: attaching the same transfer id twice leaves the pending
    /// set with that id exactly once, and attaching while already running
    /// is a legal self-edge.
    pub fn attach_transfer(mut self, transfer_id: TransferId) -> Result<Self, TransitionError> {
        self.state = self.state.transition_to(JobState::Running)?;
        self.pending_transfers.insert(transfer_id);
        self.touch();
        Ok(self)
    }

    /// Records the completion of a pending transfer.
    ///
    /// Removes the id from the pending set and appends the descriptor to
    /// the completed list. When the last pending transfer completes, the
    /// job moves to `TransfersFinished`. Completing a transfer that is not
    /// pending is a detectable double completion and raises
    /// [`TransitionError::UnknownTransfer`].
    pub fn complete_transfer(mut self, process: TransferProcess) -> Result<Self, TransitionError> {
        if !self.pending_transfers.remove(process.id()) {
            return Err(TransitionError::UnknownTransfer {
                job_id: self.job_id,
                transfer_id: process.id().clone(),
            });
        }
        self.completed_transfers.push(process);
        if self.pending_transfers.is_empty() {
            self.state = self.state.transition_to(JobState::TransfersFinished)?;
        }
        self.touch();
        Ok(self)
    }

    /// Finalizes the job (`TransfersFinished → Completed`, or
    /// `Initial → Completed` for jobs that never had work to wait for).
    pub fn complete(mut self) -> Result<Self, TransitionError> {
        self.state = self.state.transition_to(JobState::Completed)?;
        self.mark_terminal();
        Ok(self)
    }

    /// Moves the job to `Error`, recording summary and detail.
    pub fn fail(
        mut self,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) -> Result<Self, TransitionError> {
        self.state = self.state.transition_to(JobState::Error)?;
        self.error = Some(JobErrorDetail {
            summary: summary.into(),
            detail: detail.into(),
            occurred_on: Utc::now(),
        });
        self.pending_transfers.clear();
        self.mark_terminal();
        Ok(self)
    }

    /// Moves the job to `Canceled`.
    ///
    /// Cancellation is cooperative: transfers already in flight keep
    /// running, and their eventual completions become no-ops because the
    /// pending set is cleared here.
    pub fn cancel(mut self) -> Result<Self, TransitionError> {
        self.state = self.state.transition_to(JobState::Canceled)?;
        self.pending_transfers.clear();
        self.mark_terminal();
        Ok(self)
    }

    fn touch(&mut self) {
        self.last_modified_on = Utc::now();
    }

    fn mark_terminal(&mut self) {
        if self.completed_on.is_none() {
            self.completed_on = Some(Utc::now());
        }
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_registered_job() -> JobRecord {
        JobRecord::new(
            IdentificationKey::from_global_asset_id("urn:uuid:root"),
            JobParameters::default(),
            None,
        )
        .register()
        .expect("register")
    }

    #[test]
    fn test_new_record_is_unsaved_with_timestamps() {
        let record = JobRecord::new(
            IdentificationKey::from_global_asset_id("urn:uuid:root"),
            JobParameters::default(),
            None,
        );
        assert_eq!(record.state(), JobState::Unsaved);
        assert!(record.completed_on().is_none());
        assert!(record.pending_transfers().is_empty());
        assert!(record.completed_transfers().is_empty());
    }

    #[test]
    fn test_register_moves_to_initial() {
        let record = new_registered_job();
        assert_eq!(record.state(), JobState::Initial);
    }

    #[test]
    fn test_attach_transfer_twice_keeps_one_pending_entry() {
        let record = new_registered_job()
            .attach_transfer(TransferId::new("t-1"))
            .expect("first attach")
            .attach_transfer(TransferId::new("t-1"))
            .expect("second attach");

        assert_eq!(record.state(), JobState::Running);
        assert_eq!(record.pending_transfers().len(), 1);
    }

    #[test]
    fn test_complete_last_transfer_finishes_transfers() {
        let record = new_registered_job()
            .attach_transfer(TransferId::new("t-1"))
            .expect("attach")
            .complete_transfer(TransferProcess::new(TransferId::new("t-1")))
            .expect("complete");

        assert_eq!(record.state(), JobState::TransfersFinished);
        assert!(record.pending_transfers().is_empty());
        assert_eq!(record.completed_transfers().len(), 1);
        assert!(record.completed_on().is_none());
    }

    #[test]
    fn test_complete_transfer_keeps_running_while_others_pending() {
        let record = new_registered_job()
            .attach_transfer(TransferId::new("t-1"))
            .expect("attach t-1")
            .attach_transfer(TransferId::new("t-2"))
            .expect("attach t-2")
            .complete_transfer(TransferProcess::new(TransferId::new("t-1")))
            .expect("complete t-1");

        assert_eq!(record.state(), JobState::Running);
        assert_eq!(record.pending_transfers().len(), 1);
    }

    #[test]
    fn test_completion_order_independence() {
        let build = || {
            new_registered_job()
                .attach_transfer(TransferId::new("a"))
                .expect("attach a")
                .attach_transfer(TransferId::new("b"))
                .expect("attach b")
        };

        let forward = build()
            .complete_transfer(TransferProcess::new(TransferId::new("a")))
            .expect("a")
            .complete_transfer(TransferProcess::new(TransferId::new("b")))
            .expect("b");
        let backward = build()
            .complete_transfer(TransferProcess::new(TransferId::new("b")))
            .expect("b")
            .complete_transfer(TransferProcess::new(TransferId::new("a")))
            .expect("a");

        assert_eq!(forward.state(), JobState::TransfersFinished);
        assert_eq!(backward.state(), JobState::TransfersFinished);
    }

    #[test]
    fn test_double_completion_raises() {
        let record = new_registered_job()
            .attach_transfer(TransferId::new("t-1"))
            .expect("attach")
            .attach_transfer(TransferId::new("t-2"))
            .expect("attach")
            .complete_transfer(TransferProcess::new(TransferId::new("t-1")))
            .expect("first completion");

        let err = record
            .complete_transfer(TransferProcess::new(TransferId::new("t-1")))
            .expect_err("second completion must raise");
        assert!(matches!(err, TransitionError::UnknownTransfer { .. }));
    }

    #[test]
    fn test_complete_sets_completed_on_once() {
        let record = new_registered_job().complete().expect("complete");
        assert_eq!(record.state(), JobState::Completed);
        assert!(record.completed_on().is_some());
    }

    #[test]
    fn test_fail_records_detail_and_clears_pending() {
        let record = new_registered_job()
            .attach_transfer(TransferId::new("t-1"))
            .expect("attach")
            .fail("transfer start failed", "backend said no")
            .expect("fail");

        assert_eq!(record.state(), JobState::Error);
        assert!(record.pending_transfers().is_empty());
        assert!(record.completed_on().is_some());
        let error = record.error().expect("error detail");
        assert_eq!(error.summary, "transfer start failed");
        assert_eq!(error.detail, "backend said no");
    }

    #[test]
    fn test_cancel_clears_pending_transfers() {
        let record = new_registered_job()
            .attach_transfer(TransferId::new("t-1"))
            .expect("attach")
            .cancel()
            .expect("cancel");

        assert_eq!(record.state(), JobState::Canceled);
        assert!(record.pending_transfers().is_empty());
        assert!(record.completed_on().is_some());
    }

    #[test]
    fn test_cancel_from_completed_raises() {
        let record = new_registered_job().complete().expect("complete");
        assert!(record.cancel().is_err());
    }

    #[test]
    fn test_record_survives_json_round_trip() {
        let record = new_registered_job()
            .attach_transfer(TransferId::new("t-1"))
            .expect("attach");

        let json = serde_json::to_vec(&record).expect("serialize");
        let parsed: JobRecord = serde_json::from_slice(&json).expect("deserialize");

        assert_eq!(parsed.job_id(), record.job_id());
        assert_eq!(parsed.state(), JobState::Running);
        assert_eq!(parsed.pending_transfers().len(), 1);
    }
}
