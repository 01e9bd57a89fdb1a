// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Core storage backend trait for ViroDB.
//
// A backend is an ordered byte-keyed map. Every write that must be observed
// all-or-nothing by concurrent readers (log range deletes, replacing an
// entity's sequences) goes through `write_batch`.

use async_trait::async_trait;

use crate::error::StorageError;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite `key`.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove `key` if present.
    Delete { key: Vec<u8> },
}

/// An ordered list of writes applied atomically by [`StorageBackend::write_batch`].
///
/// Operations are applied in insertion order, so a delete followed by a put
/// of the same key leaves the key present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert-or-overwrite.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// A pluggable key-value storage backend.
///
/// All keys and values are opaque byte slices. Typed access is provided by
/// [`crate::typed::Collection`], which wraps a backend with JSON
/// serialization and namespace prefixing.
///
/// Implementations must be safe to share across threads and tokio tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve the value associated with `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist, rather than an error.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any previous value for `key`.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Store a key-value pair only if `key` is absent.
    ///
    /// Returns `Ok(false)` without writing when the key already exists. The
    /// check and the write happen under one lock or transaction.
    async fn insert_new(&self, key: &[u8], value: &[u8]) -> Result<bool, StorageError>;

    /// Delete the value associated with `key`.
    ///
    /// Returns `Ok(true)` if the key existed and was removed.
    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError>;

    /// Scan all keys that start with `prefix` in lexicographic order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Apply every operation in `batch` atomically.
    ///
    /// Readers observe either none or all of the batch. Returns the number of
    /// delete operations that removed an existing key.
    async fn write_batch(&self, batch: WriteBatch) -> Result<usize, StorageError>;

    /// A human-readable name for this backend, used in logging.
    fn name(&self) -> &str;
}
