//! Recursive job orchestration core.
//!
//! A job retrieves a tree-shaped dataset by issuing a dynamically-growing
//! sequence of asynchronous transfers. This module provides the engine
//! that drives such jobs:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     JobOrchestrator                       │
//! │  start_job / transfer_completed / cancel / retention     │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐   ┌────────────────────────────────┐  │
//! │  │ JobStore      │   │ CompletionDispatcher            │  │
//! │  │ (state machine│   │ (single consumer of the         │  │
//! │  │  + coarse     │   │  transfer completion channel)   │  │
//! │  │  RwLock)      │   └────────────────────────────────┘  │
//! │  └───────────────┘                                       │
//! ├──────────────────────────────────────────────────────────┤
//! │  External seams: TransferProcessManager (wire protocol), │
//! │  RecursiveJobHandler (domain recursion + result assembly)│
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The store is the sole mutator of job records and enforces the lifecycle
//! state machine; the orchestrator performs all external calls outside the
//! store lock and re-enters it only to record results.

mod blob;
mod dispatch;
mod error;
mod handler;
mod orchestrator;
mod record;
mod state;
mod store;
mod transfer;

pub use blob::BlobJobStoreBackend;
pub use dispatch::CompletionDispatcher;
pub use error::{HandlerError, StoreError, TransitionError};
pub use handler::RecursiveJobHandler;
pub use orchestrator::{
    JobCanceller, JobInitiateResponse, JobOrchestrator, RetentionSweeper,
    DEFAULT_RETENTION_SWEEP_INTERVAL,
};
pub use record::{
    IdentificationKey, JobErrorDetail, JobId, JobParameters, JobRecord, TraversalDirection,
};
pub use state::JobState;
pub use store::{InMemoryJobStoreBackend, JobStore, JobStoreBackend};
pub use transfer::{
    CompletionSender, ResponseStatus, TransferId, TransferInitiateResponse, TransferProcess,
    TransferProcessManager,
};
