//! Blob-persisted job store backend.
//!
//! Serializes each [`JobRecord`] as JSON under a `job:<jobId>` key in a
//! [`BlobPersistence`] backend. A blob that cannot be read or parsed is
//! treated as absent - logged and skipped, never propagated as a fatal
//! error, so one corrupted record cannot abort a bulk scan.

use super::record::{JobId, JobRecord};
use super::store::JobStoreBackend;
use crate::persistence::BlobPersistence;
use tracing::{error, warn};

/// Key prefix for job records in the blob store.
const JOB_PREFIX: &str = "job:";

/// Job store backend over keyed blob storage.
pub struct BlobJobStoreBackend<P: BlobPersistence> {
    blobs: P,
}

impl<P: BlobPersistence> BlobJobStoreBackend<P> {
    /// Creates a backend over the given blob persistence.
    pub fn new(blobs: P) -> Self {
        Self { blobs }
    }

    fn blob_key(job_id: &JobId) -> String {
        format!("{JOB_PREFIX}{job_id}")
    }

    fn parse(data: &[u8]) -> Option<JobRecord> {
        match serde_json::from_slice(data) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(%err, "Stored blob could not be parsed as a job record; skipping");
                None
            }
        }
    }
}

impl<P: BlobPersistence> JobStoreBackend for BlobJobStoreBackend<P> {
    fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        match self.blobs.get(&Self::blob_key(job_id)) {
            Ok(Some(data)) => Self::parse(&data),
            Ok(None) => None,
            Err(err) => {
                error!(job_id = %job_id, %err, "Failed to read job from blob store");
                None
            }
        }
    }

    fn put(&mut self, record: JobRecord) {
        let key = Self::blob_key(&record.job_id());
        let data = match serde_json::to_vec(&record) {
            Ok(data) => data,
            Err(err) => {
                error!(job_id = %record.job_id(), %err, "Failed to serialize job record");
                return;
            }
        };
        if let Err(err) = self.blobs.put(&key, data) {
            error!(job_id = %record.job_id(), %err, "Failed to write job to blob store");
        }
    }

    fn remove(&mut self, job_id: &JobId) -> Option<JobRecord> {
        let record = self.get(job_id)?;

        // Transfer results are correlated under their transfer ids; remove
        // them together with the record itself.
        let related: Vec<String> = record
            .pending_transfers()
            .iter()
            .map(|id| id.as_str().to_string())
            .chain(
                record
                    .completed_transfers()
                    .iter()
                    .map(|process| process.id().as_str().to_string()),
            )
            .collect();

        match self.blobs.delete(&Self::blob_key(job_id), &related) {
            Ok(_) => Some(record),
            Err(err) => {
                error!(job_id = %job_id, %err, "Failed to delete job from blob store");
                None
            }
        }
    }

    fn all(&self) -> Vec<JobRecord> {
        match self.blobs.find_by_prefix(JOB_PREFIX) {
            Ok(blobs) => blobs.iter().filter_map(|data| Self::parse(data)).collect(),
            Err(err) => {
                error!(%err, "Cannot scan jobs in blob store");
                Vec::new()
            }
        }
    }
}
