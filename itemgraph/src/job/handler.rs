//! The recursive job handler seam.

use super::error::HandlerError;
use super::record::JobRecord;
use super::transfer::TransferProcess;

/// Domain logic deciding what a job fetches at each recursion step.
///
/// The orchestration engine is agnostic of the traversed data: it asks the
/// handler for the initial work-items when a job starts, for the next-level
/// work-items whenever a transfer completes, and for result assembly once
/// no transfers remain pending. Returning an error is the handler's sole
/// error-signaling mechanism; the orchestrator converts it into a terminal
/// job error.
///
/// # Example
///
/// ```ignore
/// struct ItemTreeHandler { /* registry and submodel clients */ }
///
/// impl RecursiveJobHandler for ItemTreeHandler {
///     type Request = ItemRequest;
///
///     fn initiate(&self, job: &JobRecord) -> Result<Vec<ItemRequest>, HandlerError> {
///         Ok(vec![ItemRequest::root(job.key())])
///     }
///
///     fn recurse(
///         &self,
///         job: &JobRecord,
///         transfer: &TransferProcess,
///     ) -> Result<Vec<ItemRequest>, HandlerError> {
///         let relationships = self.read_result(transfer)?;
///         Ok(self.next_level(job.parameters(), relationships))
///     }
///
///     fn complete(&self, job: &JobRecord) -> Result<(), HandlerError> {
///         self.assemble_item_container(job)
///     }
/// }
/// ```
pub trait RecursiveJobHandler: Send + Sync + 'static {
    /// The work-item type this handler produces for the transfer manager.
    type Request: Send + 'static;

    /// Produces the initial work-items for a freshly created job.
    ///
    /// Returning an empty list means the job has nothing to wait for and is
    /// finalized immediately.
    fn initiate(&self, job: &JobRecord) -> Result<Vec<Self::Request>, HandlerError>;

    /// Produces the next-level work-items after a transfer completed.
    ///
    /// Called once per completed transfer, on the completion dispatcher
    /// task, in completion order per job.
    fn recurse(
        &self,
        job: &JobRecord,
        transfer: &TransferProcess,
    ) -> Result<Vec<Self::Request>, HandlerError>;

    /// Assembles the final result once all transfers have completed.
    ///
    /// Runs inside the store's completion critical section; implementations
    /// must only aggregate already-retrieved data and never perform
    /// network I/O here.
    fn complete(&self, job: &JobRecord) -> Result<(), HandlerError>;
}
