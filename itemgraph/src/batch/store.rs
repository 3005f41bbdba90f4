//! Concurrency-safe repositories for batches and orders.
//!
//! Same lock discipline as the job store: one coarse reader/writer lock
//! per store instance with a bounded acquisition timeout, surfacing as the
//! retryable [`StoreError::Busy`] when exceeded.

use super::record::{Batch, BatchId, BatchOrder, OrderId};
use crate::config::StoreConfig;
use crate::job::StoreError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// In-memory repository of [`Batch`] records.
pub struct BatchStore {
    batches: RwLock<HashMap<BatchId, Batch>>,
    lock_timeout: Duration,
}

impl BatchStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            batches: RwLock::new(HashMap::new()),
            lock_timeout: config.lock_timeout,
        }
    }

    /// Stores `batch`, replacing any prior revision.
    pub fn save(&self, batch: Batch) -> Result<(), StoreError> {
        let mut batches = self
            .batches
            .try_write_for(self.lock_timeout)
            .ok_or(StoreError::Busy)?;
        batches.insert(batch.batch_id, batch);
        Ok(())
    }

    /// Returns the batch stored under `batch_id`, if any.
    pub fn find(&self, batch_id: &BatchId) -> Result<Option<Batch>, StoreError> {
        let batches = self
            .batches
            .try_read_for(self.lock_timeout)
            .ok_or(StoreError::Busy)?;
        Ok(batches.get(batch_id).cloned())
    }

    /// Returns all stored batches.
    pub fn find_all(&self) -> Result<Vec<Batch>, StoreError> {
        let batches = self
            .batches
            .try_read_for(self.lock_timeout)
            .ok_or(StoreError::Busy)?;
        Ok(batches.values().cloned().collect())
    }

    /// Returns the batch of `order_id` at the given 1-based position.
    pub fn find_by_order_and_number(
        &self,
        order_id: &OrderId,
        batch_number: usize,
    ) -> Result<Option<Batch>, StoreError> {
        let batches = self
            .batches
            .try_read_for(self.lock_timeout)
            .ok_or(StoreError::Busy)?;
        Ok(batches
            .values()
            .find(|batch| batch.order_id == *order_id && batch.batch_number == batch_number)
            .cloned())
    }
}

impl Default for BatchStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

/// In-memory repository of [`BatchOrder`] records.
pub struct BatchOrderStore {
    orders: RwLock<HashMap<OrderId, BatchOrder>>,
    lock_timeout: Duration,
}

impl BatchOrderStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            lock_timeout: config.lock_timeout,
        }
    }

    /// Stores `order`, replacing any prior revision.
    pub fn save(&self, order: BatchOrder) -> Result<(), StoreError> {
        let mut orders = self
            .orders
            .try_write_for(self.lock_timeout)
            .ok_or(StoreError::Busy)?;
        orders.insert(order.order_id, order);
        Ok(())
    }

    /// Returns the order stored under `order_id`, if any.
    pub fn find(&self, order_id: &OrderId) -> Result<Option<BatchOrder>, StoreError> {
        let orders = self
            .orders
            .try_read_for(self.lock_timeout)
            .ok_or(StoreError::Busy)?;
        Ok(orders.get(order_id).cloned())
    }

    /// Returns all stored orders.
    pub fn find_all(&self) -> Result<Vec<BatchOrder>, StoreError> {
        let orders = self
            .orders
            .try_read_for(self.lock_timeout)
            .ok_or(StoreError::Busy)?;
        Ok(orders.values().cloned().collect())
    }
}

impl Default for BatchOrderStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
