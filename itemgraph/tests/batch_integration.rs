//! Integration tests for batch and order orchestration.
//!
//! These tests wire the full stack: orchestrator + completion dispatcher,
//! event bus, aggregator, order listener and timeout scheduler, then
//! register orders and observe the published outcomes.

use itemgraph::batch::{
    BatchId, BatchJobLauncher, BatchOrder, BatchOrderEventListener, BatchOrderService,
    BatchOrderStore, BatchStore, JobEventAggregator, JobType, LaunchError, NullTimeoutScheduler,
    ProcessingState, RegisterBatchOrder, TimeoutScheduler, TokioTimeoutScheduler,
};
use itemgraph::config::{BatchDispatchConfig, JobTtl, StoreConfig};
use itemgraph::events::{EventBus, OrchestrationEvent};
use itemgraph::job::{
    CompletionSender, HandlerError, IdentificationKey, InMemoryJobStoreBackend, JobCanceller,
    JobId, JobOrchestrator, JobRecord, JobState, JobStore, RecursiveJobHandler, ResponseStatus,
    TransferId, TransferInitiateResponse, TransferProcess, TransferProcessManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

/// Handler whose jobs finish without any transfers.
struct InstantHandler;

impl RecursiveJobHandler for InstantHandler {
    type Request = String;

    fn initiate(&self, _job: &JobRecord) -> Result<Vec<String>, HandlerError> {
        Ok(vec![])
    }

    fn recurse(
        &self,
        _job: &JobRecord,
        _transfer: &TransferProcess,
    ) -> Result<Vec<String>, HandlerError> {
        Ok(vec![])
    }

    fn complete(&self, _job: &JobRecord) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Handler that starts one transfer per job, derived from the job's key.
struct SingleTransferHandler;

impl RecursiveJobHandler for SingleTransferHandler {
    type Request = String;

    fn initiate(&self, job: &JobRecord) -> Result<Vec<String>, HandlerError> {
        Ok(vec![job.key().to_string()])
    }

    fn recurse(
        &self,
        _job: &JobRecord,
        _transfer: &TransferProcess,
    ) -> Result<Vec<String>, HandlerError> {
        Ok(vec![])
    }

    fn complete(&self, _job: &JobRecord) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Manager that accepts transfers but never finishes them.
struct NeverCompletingManager;

impl TransferProcessManager for NeverCompletingManager {
    type Request = String;

    fn initiate_request(
        &self,
        request: String,
        _completions: CompletionSender,
    ) -> TransferInitiateResponse {
        TransferInitiateResponse::ok(TransferId::new(request))
    }
}

type TestOrchestrator<H, M> = Arc<JobOrchestrator<InMemoryJobStoreBackend, H, M>>;

/// Launcher creating jobs through the orchestrator; can be scripted to
/// refuse specific keys.
struct OrchestratorLauncher<H, M>
where
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    orchestrator: TestOrchestrator<H, M>,
    refuse_key: Option<String>,
}

impl<H, M> BatchJobLauncher for OrchestratorLauncher<H, M>
where
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    fn register_item_job(
        &self,
        key: &IdentificationKey,
        order: &BatchOrder,
        batch_id: BatchId,
    ) -> Result<JobId, LaunchError> {
        if self.refuse_key.as_deref() == Some(key.to_string().as_str()) {
            return Err(LaunchError::new(key, "refused by test launcher"));
        }
        let response =
            self.orchestrator
                .start_job(key.clone(), order.parameters.clone(), Some(batch_id));
        if response.status == ResponseStatus::Ok {
            Ok(response.job_id)
        } else {
            Err(LaunchError::new(
                key,
                response.error.unwrap_or_else(|| response.status.to_string()),
            ))
        }
    }

    fn register_investigation_job(
        &self,
        key: &IdentificationKey,
        order: &BatchOrder,
        batch_id: BatchId,
    ) -> Result<JobId, LaunchError> {
        // Investigations run through the same engine in these tests
        self.register_item_job(key, order, batch_id)
    }
}

/// Fully wired batch orchestration stack.
struct Stack {
    service: BatchOrderService,
    order_store: Arc<BatchOrderStore>,
    batch_store: Arc<BatchStore>,
    events: EventBus,
    shutdown: CancellationToken,
}

async fn stack<H, M>(
    handler: H,
    manager: M,
    refuse_key: Option<String>,
    timeouts: Option<Arc<dyn TimeoutScheduler>>,
) -> Stack
where
    H: RecursiveJobHandler,
    M: TransferProcessManager<Request = H::Request>,
{
    let events = EventBus::default();
    let job_store = Arc::new(JobStore::in_memory(StoreConfig::default()));
    let (orchestrator, dispatcher) = JobOrchestrator::new(
        Arc::clone(&job_store),
        Arc::new(handler),
        Arc::new(manager),
        events.clone(),
        JobTtl::default(),
    );

    let order_store = Arc::new(BatchOrderStore::new(StoreConfig::default()));
    let batch_store = Arc::new(BatchStore::new(StoreConfig::default()));
    let aggregator = JobEventAggregator::new(
        Arc::clone(&batch_store),
        Arc::clone(&order_store),
        events.clone(),
    );
    let launcher = Arc::new(OrchestratorLauncher {
        orchestrator: Arc::clone(&orchestrator),
        refuse_key,
    });
    let timeouts = timeouts.unwrap_or_else(|| Arc::new(NullTimeoutScheduler));
    let listener = BatchOrderEventListener::new(
        Arc::clone(&order_store),
        Arc::clone(&batch_store),
        launcher,
        Arc::clone(&aggregator),
        timeouts,
        events.clone(),
        BatchDispatchConfig::default().with_batch_size(2),
    );
    let service = BatchOrderService::new(
        Arc::clone(&order_store),
        Arc::clone(&batch_store),
        events.clone(),
        BatchDispatchConfig::default().with_batch_size(2),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(dispatcher.run(shutdown.clone()));
    tokio::spawn(aggregator.run(shutdown.clone()));
    tokio::spawn(listener.run(shutdown.clone()));

    // The listener and aggregator subscribe when their loops start; wait
    // for both subscriptions before publishing anything at them.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while events.subscriber_count() < 2 {
        if tokio::time::Instant::now() > deadline {
            panic!("event consumers did not subscribe in time");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Stack {
        service,
        order_store,
        batch_store,
        events,
        shutdown,
    }
}

fn order_request(key_count: usize) -> RegisterBatchOrder {
    RegisterBatchOrder {
        keys: (0..key_count)
            .map(|i| IdentificationKey::from_global_asset_id(format!("urn:uuid:item-{i}")))
            .collect(),
        job_type: JobType::ItemGraph,
        parameters: Default::default(),
        timeout: Duration::from_secs(300),
        job_timeout: Duration::from_secs(60),
        owner: Some("tester".to_string()),
    }
}

/// Waits for the order-finished event of `order_id`, returning its state.
async fn await_order_finished(
    rx: &mut broadcast::Receiver<OrchestrationEvent>,
    order_id: itemgraph::batch::OrderId,
) -> ProcessingState {
    let wait = async {
        loop {
            match rx.recv().await.expect("event stream open") {
                OrchestrationEvent::BatchOrderProcessingFinished {
                    order_id: finished,
                    state,
                } if finished == order_id => return state,
                _ => continue,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("order did not finish in time")
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn test_order_with_two_batches_completes_in_sequence() {
    let stack = stack(InstantHandler, NeverCompletingManager, None, None).await;
    let mut rx = stack.events.subscribe();

    // 4 keys at batch size 2: two batches
    let order_id = stack
        .service
        .register_order(order_request(4))
        .expect("register");

    let state = await_order_finished(&mut rx, order_id).await;
    assert_eq!(state, ProcessingState::Completed);

    let order = stack
        .order_store
        .find(&order_id)
        .expect("find")
        .expect("present");
    assert_eq!(order.state, ProcessingState::Completed);
    assert_eq!(order.batch_ids.len(), 2);

    for batch_id in &order.batch_ids {
        let batch = stack
            .batch_store
            .find(batch_id)
            .expect("find")
            .expect("present");
        assert_eq!(batch.state, ProcessingState::Completed);
        assert!(batch.completed_on.is_some());
        assert!(batch
            .job_progress
            .iter()
            .all(|p| p.job_state == Some(JobState::Completed)));
    }

    stack.shutdown.cancel();
}

#[tokio::test]
async fn test_second_batch_not_dispatched_while_first_is_running() {
    let stack = stack(SingleTransferHandler, NeverCompletingManager, None, None).await;

    let order_id = stack
        .service
        .register_order(order_request(4))
        .expect("register");

    // The first batch's transfers never finish, so the jobs stay running
    tokio::time::sleep(Duration::from_millis(200)).await;

    let order = stack
        .order_store
        .find(&order_id)
        .expect("find")
        .expect("present");
    let first = stack
        .batch_store
        .find(&order.batch_ids[0])
        .expect("find")
        .expect("present");
    let second = stack
        .batch_store
        .find(&order.batch_ids[1])
        .expect("find")
        .expect("present");

    assert_eq!(first.state, ProcessingState::Processing);
    assert!(first.job_progress.iter().all(|p| p.job_id.is_some()));
    assert_eq!(
        second.state,
        ProcessingState::Initialized,
        "batch 2 must wait for batch 1"
    );
    assert!(second.job_progress.iter().all(|p| p.job_id.is_none()));

    stack.shutdown.cancel();
}

#[tokio::test]
async fn test_refused_launch_makes_batch_and_order_partial() {
    let stack = stack(
        InstantHandler,
        NeverCompletingManager,
        Some("urn:uuid:item-1".to_string()),
        None,
    )
    .await;
    let mut rx = stack.events.subscribe();

    let order_id = stack
        .service
        .register_order(order_request(2))
        .expect("register");

    let state = await_order_finished(&mut rx, order_id).await;
    assert_eq!(state, ProcessingState::Partial);

    let order = stack
        .order_store
        .find(&order_id)
        .expect("find")
        .expect("present");
    let batch = stack
        .batch_store
        .find(&order.batch_ids[0])
        .expect("find")
        .expect("present");
    assert_eq!(batch.state, ProcessingState::Partial);

    let refused = batch
        .job_progress
        .iter()
        .find(|p| p.identification_key.global_asset_id.as_deref() == Some("urn:uuid:item-1"))
        .expect("refused entry");
    assert!(refused.job_id.is_none());
    assert_eq!(refused.job_state, Some(JobState::Error));

    stack.shutdown.cancel();
}

#[tokio::test]
async fn test_order_without_keys_finishes_completed() {
    let stack = stack(InstantHandler, NeverCompletingManager, None, None).await;
    let mut rx = stack.events.subscribe();

    let order_id = stack
        .service
        .register_order(order_request(0))
        .expect("register");

    let state = await_order_finished(&mut rx, order_id).await;
    assert_eq!(state, ProcessingState::Completed);

    stack.shutdown.cancel();
}

#[tokio::test]
async fn test_job_timeout_cancels_stuck_jobs_and_order_ends_partial() {
    // Wire the stack manually so the timeout scheduler can cancel through
    // the same orchestrator the launcher creates jobs with.
    let events = EventBus::default();
    let job_store = Arc::new(JobStore::in_memory(StoreConfig::default()));
    let (orchestrator, dispatcher) = JobOrchestrator::new(
        Arc::clone(&job_store),
        Arc::new(SingleTransferHandler),
        Arc::new(NeverCompletingManager),
        events.clone(),
        JobTtl::default(),
    );

    let order_store = Arc::new(BatchOrderStore::new(StoreConfig::default()));
    let batch_store = Arc::new(BatchStore::new(StoreConfig::default()));
    let aggregator = JobEventAggregator::new(
        Arc::clone(&batch_store),
        Arc::clone(&order_store),
        events.clone(),
    );
    let canceller: Arc<dyn JobCanceller> = Arc::clone(&orchestrator);
    let timeouts = TokioTimeoutScheduler::new(canceller, Arc::clone(&batch_store));
    let launcher = Arc::new(OrchestratorLauncher {
        orchestrator: Arc::clone(&orchestrator),
        refuse_key: None,
    });
    let listener = BatchOrderEventListener::new(
        Arc::clone(&order_store),
        Arc::clone(&batch_store),
        launcher,
        Arc::clone(&aggregator),
        timeouts,
        events.clone(),
        BatchDispatchConfig::default().with_batch_size(2),
    );
    let service = BatchOrderService::new(
        Arc::clone(&order_store),
        Arc::clone(&batch_store),
        events.clone(),
        BatchDispatchConfig::default().with_batch_size(2),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(dispatcher.run(shutdown.clone()));
    tokio::spawn(aggregator.run(shutdown.clone()));
    tokio::spawn(listener.run(shutdown.clone()));
    while events.subscriber_count() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut rx = events.subscribe();
    let order_id = service
        .register_order(RegisterBatchOrder {
            job_timeout: Duration::from_millis(200),
            timeout: Duration::from_secs(30),
            ..order_request(2)
        })
        .expect("register");

    // The jobs' transfers never finish; the job timeout must cancel them
    let state = await_order_finished(&mut rx, order_id).await;
    assert_eq!(state, ProcessingState::Partial);

    let order = order_store.find(&order_id).expect("find").expect("present");
    let batch = batch_store
        .find(&order.batch_ids[0])
        .expect("find")
        .expect("present");
    assert_eq!(batch.state, ProcessingState::Partial);
    assert!(batch
        .job_progress
        .iter()
        .all(|p| p.job_state == Some(JobState::Canceled)));

    shutdown.cancel();
}
