//! Itemgraph - recursive discovery of supply-chain relationship graphs.
//!
//! This library retrieves tree-shaped relationship data by issuing an
//! unbounded, dynamically-growing sequence of asynchronous data transfers,
//! one job per root request. Jobs can be grouped into batches, and batches
//! into orders, with aggregate completion tracking at every level.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Batch Orchestration                       │
//! │  BatchOrderService → BatchOrderEventListener                 │
//! │  JobEventAggregator (per-batch countdown) → order aggregate  │
//! ├──────────────────────────────────────────────────────────────┤
//! │                      Job Orchestration                        │
//! │  JobOrchestrator: start transfers, recurse on completion,    │
//! │  finalize. CompletionDispatcher feeds transfer completions.  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────────┐ │
//! │  │ JobStore   │  │ EventBus     │  │ External seams:       │ │
//! │  │ (memory or │  │ (broadcast)  │  │ TransferProcessManager│ │
//! │  │  blob)     │  │              │  │ RecursiveJobHandler   │ │
//! │  └────────────┘  └──────────────┘  └──────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Job**: one recursive traversal request. A job owns a set of pending
//!   transfers and a list of completed ones, and moves through a strict
//!   lifecycle (`Initial → Running → TransfersFinished → Completed`, with
//!   `Error` and `Canceled` escape hatches).
//!
//! - **Transfer**: one externally-managed asynchronous retrieval started on
//!   behalf of a job. Transfers are negotiated by a pluggable
//!   [`job::TransferProcessManager`]; completions arrive on a channel and
//!   may be delivered late, duplicated, or out of order.
//!
//! - **Handler**: the pluggable [`job::RecursiveJobHandler`] that decides
//!   what to fetch at each recursion step and assembles the final result.
//!
//! - **Batch / Order**: groups of jobs dispatched and tracked together.
//!   Batches of an order run strictly in sequence; job outcomes aggregate
//!   into a batch state, batch outcomes into an order state.
//!
//! # Example
//!
//! ```ignore
//! use itemgraph::config::{JobTtl, StoreConfig};
//! use itemgraph::events::EventBus;
//! use itemgraph::job::{InMemoryJobStoreBackend, JobOrchestrator, JobStore};
//!
//! let store = Arc::new(JobStore::in_memory(StoreConfig::default()));
//! let events = EventBus::default();
//! let (orchestrator, dispatcher) =
//!     JobOrchestrator::new(store, handler, manager, events, JobTtl::default());
//!
//! tokio::spawn(dispatcher.run(shutdown_token));
//!
//! let response = orchestrator.start_job(key, parameters, None);
//! ```

pub mod batch;
pub mod config;
pub mod events;
pub mod job;
pub mod logging;
pub mod persistence;

/// Version of the itemgraph library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
