//! Transfer completion dispatcher.
//!
//! The transfer backend reports completions on a channel; this dispatcher
//! is the single consumer of that channel and re-enters the orchestrator
//! for each completed transfer. One dispatcher task per orchestrator keeps
//! per-job recursion steps in completion order while the backend remains
//! free to finish transfers from any task at any time.

use super::handler::RecursiveJobHandler;
use super::orchestrator::JobOrchestrator;
use super::store::JobStoreBackend;
use super::transfer::{TransferProcess, TransferProcessManager};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Consumes transfer completions and feeds them to the orchestrator.
pub struct CompletionDispatcher<B, H, M>
where
    B: JobStoreBackend,
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    orchestrator: Arc<JobOrchestrator<B, H, M>>,
    completions: mpsc::UnboundedReceiver<TransferProcess>,
}

impl<B, H, M> CompletionDispatcher<B, H, M>
where
    B: JobStoreBackend,
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    pub(crate) fn new(
        orchestrator: Arc<JobOrchestrator<B, H, M>>,
        completions: mpsc::UnboundedReceiver<TransferProcess>,
    ) -> Self {
        Self {
            orchestrator,
            completions,
        }
    }

    /// Runs the dispatcher until cancelled.
    ///
    /// On shutdown, completions already queued are still processed so that
    /// transfers finished just before the signal are recorded.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Transfer completion dispatcher started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    break;
                }

                received = self.completions.recv() => {
                    match received {
                        Some(process) => self.orchestrator.transfer_completed(process),
                        // All senders dropped - the orchestrator is gone
                        None => break,
                    }
                }
            }
        }

        while let Ok(process) = self.completions.try_recv() {
            self.orchestrator.transfer_completed(process);
        }

        info!("Transfer completion dispatcher stopped");
    }
}

impl<B, H, M> std::fmt::Debug for CompletionDispatcher<B, H, M>
where
    B: JobStoreBackend,
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionDispatcher").finish_non_exhaustive()
    }
}
