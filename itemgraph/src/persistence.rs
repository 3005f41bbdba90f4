//! Blob persistence seam for durable stores.
//!
//! Durable store backends serialize records into opaque blobs and delegate
//! the actual storage to a [`BlobPersistence`] implementation - an object
//! store, a database, or the bundled [`InMemoryBlobStore`] for tests and
//! single-process deployments.

use std::collections::HashMap;
use thiserror::Error;

/// Error raised by a blob persistence backend.
#[derive(Debug, Clone, Error)]
#[error("blob persistence error: {message}")]
pub struct BlobPersistenceError {
    message: String,
}

impl BlobPersistenceError {
    /// Creates an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Keyed binary storage.
///
/// Implementations only need per-key consistency: the stores layered on
/// top serialize every read-modify-write of a record under their own lock,
/// so a blob is never written concurrently for the same key.
pub trait BlobPersistence: Send + Sync + 'static {
    /// Stores `data` under `key`, replacing any existing blob.
    fn put(&mut self, key: &str, data: Vec<u8>) -> Result<(), BlobPersistenceError>;

    /// Returns the blob stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobPersistenceError>;

    /// Returns all blobs whose key starts with `prefix`.
    fn find_by_prefix(&self, prefix: &str) -> Result<Vec<Vec<u8>>, BlobPersistenceError>;

    /// Deletes the blob under `key` together with the given related keys.
    ///
    /// Returns true if the primary key existed.
    fn delete(&mut self, key: &str, related: &[String]) -> Result<bool, BlobPersistenceError>;
}

/// In-memory [`BlobPersistence`] implementation.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    /// Creates an empty blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true when no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobPersistence for InMemoryBlobStore {
    fn put(&mut self, key: &str, data: Vec<u8>) -> Result<(), BlobPersistenceError> {
        self.blobs.insert(key.to_string(), data);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobPersistenceError> {
        Ok(self.blobs.get(key).cloned())
    }

    fn find_by_prefix(&self, prefix: &str) -> Result<Vec<Vec<u8>>, BlobPersistenceError> {
        Ok(self
            .blobs
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, data)| data.clone())
            .collect())
    }

    fn delete(&mut self, key: &str, related: &[String]) -> Result<bool, BlobPersistenceError> {
        for related_key in related {
            self.blobs.remove(related_key);
        }
        Ok(self.blobs.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_round_trip() {
        let mut store = InMemoryBlobStore::new();
        store.put("job:1", b"payload".to_vec()).expect("put");

        let data = store.get("job:1").expect("get");
        assert_eq!(data, Some(b"payload".to_vec()));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = InMemoryBlobStore::new();
        assert!(store.get("job:missing").expect("get").is_none());
    }

    #[test]
    fn test_find_by_prefix_filters_keys() {
        let mut store = InMemoryBlobStore::new();
        store.put("job:1", b"a".to_vec()).expect("put");
        store.put("job:2", b"b".to_vec()).expect("put");
        store.put("batch:1", b"c".to_vec()).expect("put");

        let jobs = store.find_by_prefix("job:").expect("find");
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_delete_removes_related_keys() {
        let mut store = InMemoryBlobStore::new();
        store.put("job:1", b"a".to_vec()).expect("put");
        store.put("transfer:x", b"b".to_vec()).expect("put");

        let existed = store
            .delete("job:1", &["transfer:x".to_string()])
            .expect("delete");
        assert!(existed);
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_missing_returns_false() {
        let mut store = InMemoryBlobStore::new();
        assert!(!store.delete("job:missing", &[]).expect("delete"));
    }
}
