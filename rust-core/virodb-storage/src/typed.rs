// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Typed collections over a raw backend.
//
// A `Collection` is the document-store view the rest of ViroDB uses: values
// are JSON documents and every key lives under `"{namespace}:"`, so the
// entity, sequence and history collections share one physical backend
// without collisions.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::backend::{StorageBackend, WriteBatch};
use crate::error::StorageError;

/// A JSON-typed, namespaced view over a [`StorageBackend`].
///
/// # Example
///
/// ```rust
/// use virodb_storage::memory::InMemoryBackend;
/// use virodb_storage::typed::Collection;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Serialize, Deserialize, PartialEq)]
/// struct Isolate { source_type: String, source_name: String }
///
/// # tokio_test::block_on(async {
/// let isolates = Collection::new(InMemoryBackend::new(), "isolates");
///
/// let baz = Isolate { source_type: "isolate".into(), source_name: "Baz".into() };
/// isolates.put("baz", &baz).await.unwrap();
///
/// let retrieved: Isolate = isolates.get("baz").await.unwrap().unwrap();
/// assert_eq!(retrieved, baz);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Collection<B: StorageBackend> {
    backend: B,
    namespace: String,
}

impl<B: StorageBackend> Collection<B> {
    /// Create a collection over `backend`; keys are prefixed with `"{namespace}:"`.
    pub fn new(backend: B, namespace: &str) -> Self {
        Self {
            backend,
            namespace: namespace.to_string(),
        }
    }

    fn prefixed_key(&self, key: &str) -> Vec<u8> {
        format!("{}:{}", self.namespace, key).into_bytes()
    }

    fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(value).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })
    }

    fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StorageError> {
        serde_json::from_slice(bytes).map_err(|source| StorageError::Decode {
            key: key.to_string(),
            source,
        })
    }

    /// Retrieve and deserialize a document by its key.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.backend.get(&self.prefixed_key(key)).await? {
            Some(bytes) => Ok(Some(Self::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a document.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = Self::encode(key, value)?;
        self.backend.put(&self.prefixed_key(key), &bytes).await
    }

    /// Insert a document only when `key` is free. Returns `Ok(false)` if taken.
    pub async fn insert_new<T: Serialize>(&self, key: &str, value: &T) -> Result<bool, StorageError> {
        let bytes = Self::encode(key, value)?;
        self.backend.insert_new(&self.prefixed_key(key), &bytes).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.backend.delete(&self.prefixed_key(key)).await
    }

    /// Every document whose key starts with `key_prefix`, as `(key, value)`
    /// pairs in key order. An empty prefix lists the whole collection.
    pub async fn scan_prefix<T: DeserializeOwned>(
        &self,
        key_prefix: &str,
    ) -> Result<Vec<(String, T)>, StorageError> {
        let full_prefix = self.prefixed_key(key_prefix);
        let ns_len = self.namespace.len() + 1;

        let raw = self.backend.scan_prefix(&full_prefix).await?;
        debug!(
            namespace = %self.namespace,
            prefix = %key_prefix,
            hits = raw.len(),
            "collection scan"
        );

        let mut results = Vec::with_capacity(raw.len());
        for (raw_key, raw_value) in raw {
            let key = String::from_utf8_lossy(&raw_key[ns_len..]).to_string();
            let value = Self::decode(&key, &raw_value)?;
            results.push((key, value));
        }
        Ok(results)
    }

    /// Stage a document write into `batch`.
    pub fn stage_put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = Self::encode(key, value)?;
        batch.put(self.prefixed_key(key), bytes);
        Ok(())
    }

    /// Stage a document delete into `batch`.
    pub fn stage_delete(&self, batch: &mut WriteBatch, key: &str) {
        batch.delete(self.prefixed_key(key));
    }

    /// Apply a staged batch atomically. Returns how many staged deletes hit
    /// an existing document.
    pub async fn commit(&self, batch: WriteBatch) -> Result<usize, StorageError> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.backend.write_batch(batch).await
    }
}
