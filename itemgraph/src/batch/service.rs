//! Batch order registration.

use super::record::{Batch, BatchOrder, JobType, OrderId, ProcessingState};
use super::store::{BatchOrderStore, BatchStore};
use crate::config::BatchDispatchConfig;
use crate::events::{EventBus, OrchestrationEvent};
use crate::job::{IdentificationKey, JobParameters, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A caller-facing request for a batch order.
#[derive(Clone, Debug)]
pub struct RegisterBatchOrder {
    /// Root nodes to traverse, one job each.
    pub keys: Vec<IdentificationKey>,

    /// Kind of job dispatched per key.
    pub job_type: JobType,

    /// Shared job parameters.
    pub parameters: JobParameters,

    /// Wall-clock budget per batch.
    pub timeout: Duration,

    /// Wall-clock budget per job.
    pub job_timeout: Duration,

    /// Requesting principal.
    pub owner: Option<String>,
}

/// Splits order requests into batches and persists them.
pub struct BatchOrderService {
    order_store: Arc<BatchOrderStore>,
    batch_store: Arc<BatchStore>,
    events: EventBus,
    config: BatchDispatchConfig,
}

impl BatchOrderService {
    /// Creates a service over the given stores and bus.
    pub fn new(
        order_store: Arc<BatchOrderStore>,
        batch_store: Arc<BatchStore>,
        events: EventBus,
        config: BatchDispatchConfig,
    ) -> Self {
        Self {
            order_store,
            batch_store,
            events,
            config,
        }
    }

    /// Registers a new batch order.
    ///
    /// Splits the requested keys into numbered batches of the configured
    /// size, persists order and batches in the `Initialized` state, and
    /// announces the order on the bus. Dispatch of the first batch is
    /// picked up by the order listener.
    pub fn register_order(&self, request: RegisterBatchOrder) -> Result<OrderId, StoreError> {
        let order_id = OrderId::random();
        let batch_size = self.config.batch_size.max(1);

        let batches: Vec<Batch> = request
            .keys
            .chunks(batch_size)
            .enumerate()
            .map(|(index, chunk)| Batch::new(order_id, index + 1, chunk.to_vec()))
            .collect();

        let order = BatchOrder {
            order_id,
            batch_ids: batches.iter().map(|batch| batch.batch_id).collect(),
            job_type: request.job_type,
            parameters: request.parameters,
            timeout: request.timeout,
            job_timeout: request.job_timeout,
            state: ProcessingState::Initialized,
            owner: request.owner,
        };

        self.order_store.save(order)?;
        for batch in batches {
            self.batch_store.save(batch)?;
        }

        info!(
            order_id = %order_id,
            keys = request.keys.len(),
            batch_size,
            "Registered batch order"
        );
        self.events
            .publish(OrchestrationEvent::BatchOrderRegistered { order_id });

        Ok(order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn service() -> (BatchOrderService, Arc<BatchOrderStore>, Arc<BatchStore>, EventBus) {
        let order_store = Arc::new(BatchOrderStore::new(StoreConfig::default()));
        let batch_store = Arc::new(BatchStore::new(StoreConfig::default()));
        let events = EventBus::default();
        let service = BatchOrderService::new(
            Arc::clone(&order_store),
            Arc::clone(&batch_store),
            events.clone(),
            BatchDispatchConfig::default().with_batch_size(2),
        );
        (service, order_store, batch_store, events)
    }

    fn request(key_count: usize) -> RegisterBatchOrder {
        RegisterBatchOrder {
            keys: (0..key_count)
                .map(|i| IdentificationKey::from_global_asset_id(format!("urn:uuid:{i}")))
                .collect(),
            job_type: JobType::ItemGraph,
            parameters: JobParameters::default(),
            timeout: Duration::from_secs(300),
            job_timeout: Duration::from_secs(60),
            owner: None,
        }
    }

    #[tokio::test]
    async fn test_register_order_splits_keys_into_numbered_batches() {
        let (service, order_store, batch_store, _events) = service();

        let order_id = service.register_order(request(5)).expect("register");

        let order = order_store.find(&order_id).expect("find").expect("present");
        assert_eq!(order.state, ProcessingState::Initialized);
        assert_eq!(order.batch_ids.len(), 3, "5 keys at size 2 give 3 batches");

        for (index, batch_id) in order.batch_ids.iter().enumerate() {
            let batch = batch_store.find(batch_id).expect("find").expect("present");
            assert_eq!(batch.batch_number, index + 1);
            assert_eq!(batch.order_id, order_id);
        }

        let last = batch_store
            .find(&order.batch_ids[2])
            .expect("find")
            .expect("present");
        assert_eq!(last.job_progress.len(), 1, "remainder batch holds one key");
    }

    #[tokio::test]
    async fn test_register_order_publishes_registered_event() {
        let (service, _order_store, _batch_store, events) = service();
        let mut rx = events.subscribe();

        let order_id = service.register_order(request(1)).expect("register");

        match rx.recv().await.expect("event") {
            OrchestrationEvent::BatchOrderRegistered { order_id: received } => {
                assert_eq!(received, order_id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_order_without_keys_creates_no_batches() {
        let (service, order_store, batch_store, _events) = service();

        let order_id = service.register_order(request(0)).expect("register");

        let order = order_store.find(&order_id).expect("find").expect("present");
        assert!(order.batch_ids.is_empty());
        assert!(batch_store.find_all().expect("all").is_empty());
    }
}
