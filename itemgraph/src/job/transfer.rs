//! Transfer process types and the transfer manager seam.
//!
//! A transfer is one externally-managed asynchronous retrieval started on
//! behalf of a job. The engine never performs the transfer itself: it asks
//! the pluggable [`TransferProcessManager`] to start one and learns about
//! completion through a channel consumed by the completion dispatcher.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Opaque identifier of a transfer process, assigned by the transfer backend.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferId(String);

impl TransferId {
    /// Creates a transfer id from its backend-assigned string value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string value of this transfer id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TransferId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TransferId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Descriptor of one completed (or in-flight) transfer process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProcess {
    id: TransferId,
}

impl TransferProcess {
    /// Creates a descriptor for the given transfer id.
    pub fn new(id: TransferId) -> Self {
        Self { id }
    }

    /// Returns the transfer id.
    pub fn id(&self) -> &TransferId {
        &self.id
    }
}

/// Outcome of a transfer start request.
///
/// This is a small closed set: anything other than [`ResponseStatus::Ok`]
/// means "this transfer did not start" and aborts the remaining work-items
/// of the current recursion step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// The transfer was accepted and is now in flight.
    Ok,

    /// The transfer was rejected for a transient reason; retrying may help.
    ErrorRetry,

    /// The transfer was rejected permanently.
    FatalError,
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "Ok"),
            Self::ErrorRetry => write!(f, "ErrorRetry"),
            Self::FatalError => write!(f, "FatalError"),
        }
    }
}

/// Response returned by [`TransferProcessManager::initiate_request`].
#[derive(Clone, Debug)]
pub struct TransferInitiateResponse {
    /// Identifier of the started transfer; present only on success.
    pub transfer_id: Option<TransferId>,

    /// Start outcome.
    pub status: ResponseStatus,
}

impl TransferInitiateResponse {
    /// A successful start carrying the backend-assigned transfer id.
    pub fn ok(transfer_id: TransferId) -> Self {
        Self {
            transfer_id: Some(transfer_id),
            status: ResponseStatus::Ok,
        }
    }

    /// A rejected start with the given failure status.
    pub fn failed(status: ResponseStatus) -> Self {
        Self {
            transfer_id: None,
            status,
        }
    }
}

/// Sender half of the transfer completion channel.
///
/// The orchestrator hands a clone of this to the transfer manager with
/// every start request; the manager reports eventual completion by calling
/// [`CompletionSender::notify`] from whatever task or thread finishes the
/// transfer. Delivery is at-least-once: duplicates and completions for
/// already-removed transfers are tolerated downstream.
#[derive(Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<TransferProcess>,
}

impl CompletionSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<TransferProcess>) -> Self {
        Self { tx }
    }

    /// Reports a completed transfer to the orchestration engine.
    ///
    /// Never blocks. If the completion dispatcher has shut down the
    /// completion is dropped; any affected job is resolved by timeout.
    pub fn notify(&self, process: TransferProcess) {
        if let Err(dropped) = self.tx.send(process) {
            debug!(
                transfer_id = %dropped.0.id(),
                "Completion dispatcher stopped; dropping transfer completion"
            );
        }
    }
}

impl std::fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSender").finish_non_exhaustive()
    }
}

/// Seam to the external component that negotiates and executes transfers.
///
/// Implementations start one asynchronous retrieval per work-item and
/// report completion on the provided [`CompletionSender`]. The request type
/// is chosen by the paired [`RecursiveJobHandler`](super::RecursiveJobHandler),
/// which produces the work-items this manager consumes.
pub trait TransferProcessManager: Send + Sync + 'static {
    /// The work-item type accepted by this manager.
    type Request: Send + 'static;

    /// Starts one transfer for the given work-item.
    ///
    /// Must return without blocking on the transfer itself. A non-Ok status
    /// means the transfer did not start and no completion will ever be
    /// delivered for it.
    fn initiate_request(
        &self,
        request: Self::Request,
        completions: CompletionSender,
    ) -> TransferInitiateResponse;
}
