//! Configuration types for orchestration components.
//!
//! Each config struct groups the parameters of one concern and carries
//! sensible defaults, so components can be constructed with
//! `Config::default()` and tuned with `with_*` builders where needed.

use std::time::Duration;

/// Default bounded acquisition timeout for store locks (30 seconds).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retention period for successfully completed jobs (1 hour).
pub const DEFAULT_COMPLETED_JOB_TTL: Duration = Duration::from_secs(60 * 60);

/// Default retention period for failed jobs (7 days).
///
/// Failed jobs are kept much longer than completed ones so their error
/// details remain available for diagnosis.
pub const DEFAULT_FAILED_JOB_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default number of concurrent workers used to dispatch the jobs of a batch.
pub const DEFAULT_DISPATCH_WORKERS: usize = 8;

/// Default number of jobs per batch when splitting an order.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default event bus channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a record store's lock discipline.
///
/// Every store guards its record collection with one coarse reader/writer
/// lock. Acquisition is bounded: a caller that cannot take the lock within
/// `lock_timeout` receives a retryable busy error instead of blocking
/// indefinitely.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum time to wait for the store lock.
    pub lock_timeout: Duration,
}

impl StoreConfig {
    /// Creates a config with the given lock acquisition timeout.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Retention periods for terminal jobs.
///
/// Completed and failed jobs use distinct time-to-live values; cleanup
/// deletes jobs whose completion timestamp is older than the TTL.
#[derive(Debug, Clone)]
pub struct JobTtl {
    /// Retention for jobs that completed successfully.
    pub completed: Duration,

    /// Retention for jobs that ended in error.
    pub failed: Duration,
}

impl JobTtl {
    /// Creates a TTL configuration with explicit retention periods.
    pub fn new(completed: Duration, failed: Duration) -> Self {
        Self { completed, failed }
    }
}

impl Default for JobTtl {
    fn default() -> Self {
        Self {
            completed: DEFAULT_COMPLETED_JOB_TTL,
            failed: DEFAULT_FAILED_JOB_TTL,
        }
    }
}

/// Configuration for batch dispatch.
#[derive(Debug, Clone)]
pub struct BatchDispatchConfig {
    /// Maximum number of jobs created concurrently when a batch starts.
    pub worker_limit: usize,

    /// Number of jobs per batch when splitting an order into batches.
    pub batch_size: usize,
}

impl BatchDispatchConfig {
    /// Sets the concurrent worker limit.
    pub fn with_worker_limit(mut self, worker_limit: usize) -> Self {
        self.worker_limit = worker_limit.max(1);
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl Default for BatchDispatchConfig {
    fn default() -> Self {
        Self {
            worker_limit: DEFAULT_DISPATCH_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default_lock_timeout() {
        let config = StoreConfig::default();
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_store_config_with_lock_timeout() {
        let config = StoreConfig::default().with_lock_timeout(Duration::from_millis(50));
        assert_eq!(config.lock_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_job_ttl_failed_longer_than_completed() {
        let ttl = JobTtl::default();
        assert!(ttl.failed > ttl.completed);
    }

    #[test]
    fn test_batch_dispatch_config_clamps_to_one() {
        let config = BatchDispatchConfig::default()
            .with_worker_limit(0)
            .with_batch_size(0);
        assert_eq!(config.worker_limit, 1);
        assert_eq!(config.batch_size, 1);
    }
}
