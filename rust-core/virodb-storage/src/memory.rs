// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Process-local backend. Used by tests and by `--backend memory`; nothing
// survives the process.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::{StorageBackend, WriteBatch, WriteOp};
use crate::error::StorageError;

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// Sorted in-memory key space. Clones share the same entries, so one backend
/// can feed several [`crate::typed::Collection`]s.
///
/// ```rust
/// use virodb_storage::memory::InMemoryBackend;
/// use virodb_storage::backend::StorageBackend;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryBackend::new();
/// store.put(b"history:foobar.0", b"{}").await.unwrap();
/// assert_eq!(store.get(b"history:foobar.0").await.unwrap(), Some(b"{}".to_vec()));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    entries: Arc<RwLock<Entries>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.entries.write().await.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn insert_new(&self, key: &[u8], value: &[u8]) -> Result<bool, StorageError> {
        let mut entries = self.entries.write().await;
        match entries.entry(key.to_vec()) {
            std::collections::btree_map::Entry::Occupied(_) => Ok(false),
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(value.to_vec());
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    // One write guard for the whole batch; readers see all of it or none.
    async fn write_batch(&self, batch: WriteBatch) -> Result<usize, StorageError> {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                WriteOp::Delete { key } => removed += usize::from(entries.remove(&key).is_some()),
            }
        }
        Ok(removed)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites_and_delete_reports_presence() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.get(b"entities:foobar").await.unwrap(), None);

        backend.put(b"entities:foobar", b"v0").await.unwrap();
        backend.put(b"entities:foobar", b"v1").await.unwrap();
        assert_eq!(backend.get(b"entities:foobar").await.unwrap(), Some(b"v1".to_vec()));

        assert!(backend.delete(b"entities:foobar").await.unwrap());
        assert!(!backend.delete(b"entities:foobar").await.unwrap());
        assert!(backend.scan_prefix(b"").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_new_refuses_existing_key() {
        let backend = InMemoryBackend::new();

        assert!(backend.insert_new(b"foobar.0", b"first").await.unwrap());
        assert!(!backend.insert_new(b"foobar.0", b"second").await.unwrap());
        assert_eq!(backend.get(b"foobar.0").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_scan_prefix_is_ordered_and_bounded() {
        let backend = InMemoryBackend::new();

        backend.put(b"seq:foobar/test_2", b"b").await.unwrap();
        backend.put(b"seq:foobar/test_1", b"a").await.unwrap();
        backend.put(b"seq:foobaz/test_3", b"c").await.unwrap();

        let results = backend.scan_prefix(b"seq:foobar/").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, b"seq:foobar/test_1".to_vec());
        assert_eq!(results[1].0, b"seq:foobar/test_2".to_vec());

        assert!(backend.scan_prefix(b"missing:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_batch_applies_in_order() {
        let backend = InMemoryBackend::new();
        backend.put(b"a", b"1").await.unwrap();
        backend.put(b"b", b"2").await.unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(b"a".to_vec()).delete(b"b".to_vec()).delete(b"zz".to_vec());
        batch.put(b"b".to_vec(), b"3".to_vec());

        let removed = backend.write_batch(batch).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.get(b"a").await.unwrap(), None);
        assert_eq!(backend.get(b"b").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let backend = InMemoryBackend::new();
        let clone = backend.clone();

        backend.put(b"shared", b"data").await.unwrap();
        assert_eq!(clone.get(b"shared").await.unwrap(), Some(b"data".to_vec()));
        assert_eq!(clone.name(), "in-memory");
    }
}
