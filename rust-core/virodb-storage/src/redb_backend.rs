// SPDX-License-Identifier: PMPL-1.0-or-later
//
// redb-backed persistent storage backend for ViroDB.
//
// One redb file, one table. Reads run in read transactions; every write,
// including a whole `WriteBatch`, is one write transaction, so a batch is
// durable and visible all at once. redb calls are blocking and run on the
// tokio blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use crate::backend::{StorageBackend, WriteBatch, WriteOp};
use crate::error::StorageError;

const DOCUMENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("documents");

/// A persistent storage backend powered by redb.
///
/// Clones share the same database handle.
///
/// ```rust,no_run
/// use virodb_storage::redb_backend::RedbBackend;
/// use virodb_storage::backend::StorageBackend;
///
/// # tokio_test::block_on(async {
/// let store = RedbBackend::open("/tmp/virodb-test.redb").unwrap();
/// store.put(b"hello", b"world").await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbBackend {
    /// Open or create a redb database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(&path).map_err(|e| {
            StorageError::Unavailable(format!(
                "failed to open redb at {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "opened redb backend");

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StorageError::Unavailable(format!("task join: {e}")))?
    }
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish()
    }
}

fn unavailable(context: &str, e: impl Into<redb::Error>) -> StorageError {
    StorageError::Unavailable(format!("{context}: {}", e.into()))
}

fn corrupted(context: &str, e: impl Into<redb::Error>) -> StorageError {
    StorageError::Corrupted(format!("{context}: {}", e.into()))
}

#[async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(|e| unavailable("read txn", e))?;
            let table = match txn.open_table(DOCUMENTS) {
                Ok(t) => t,
                // Nothing has been written yet.
                Err(_) => return Ok(None),
            };
            let value = table
                .get(key.as_slice())
                .map_err(|e| corrupted("get", e))?
                .map(|v| v.value().to_vec());
            Ok(value)
        })
        .await
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.write_batch(batch).await.map(|_| ())
    }

    async fn insert_new(&self, key: &[u8], value: &[u8]) -> Result<bool, StorageError> {
        let key = key.to_vec();
        let value = value.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(|e| unavailable("write txn", e))?;
            let inserted;
            {
                let mut table = txn
                    .open_table(DOCUMENTS)
                    .map_err(|e| unavailable("open table", e))?;
                let exists = table
                    .get(key.as_slice())
                    .map_err(|e| corrupted("get", e))?
                    .is_some();
                inserted = !exists;
                if inserted {
                    table
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(|e| corrupted("insert", e))?;
                }
            }
            txn.commit().map_err(|e| corrupted("commit", e))?;
            Ok(inserted)
        })
        .await
    }

    async fn delete(&self, key: &[u8]) -> Result<bool, StorageError> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        Ok(self.write_batch(batch).await? > 0)
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let prefix = prefix.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(|e| unavailable("read txn", e))?;
            let table = match txn.open_table(DOCUMENTS) {
                Ok(t) => t,
                Err(_) => return Ok(Vec::new()),
            };

            let mut results = Vec::new();
            let iter = table
                .range(prefix.as_slice()..)
                .map_err(|e| corrupted("range scan", e))?;
            for entry in iter {
                let (k, v) = entry.map_err(|e| corrupted("scan entry", e))?;
                let k = k.value().to_vec();
                if !k.starts_with(&prefix) {
                    break;
                }
                results.push((k, v.value().to_vec()));
            }
            Ok(results)
        })
        .await
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<usize, StorageError> {
        let ops = batch.into_ops();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(|e| unavailable("write txn", e))?;
            let mut removed = 0;
            {
                let mut table = txn
                    .open_table(DOCUMENTS)
                    .map_err(|e| unavailable("open table", e))?;
                for op in &ops {
                    match op {
                        WriteOp::Put { key, value } => {
                            table
                                .insert(key.as_slice(), value.as_slice())
                                .map_err(|e| corrupted("batch insert", e))?;
                        }
                        WriteOp::Delete { key } => {
                            let existed = table
                                .remove(key.as_slice())
                                .map_err(|e| corrupted("batch remove", e))?
                                .is_some();
                            if existed {
                                removed += 1;
                            }
                        }
                    }
                }
            }
            txn.commit().map_err(|e| corrupted("batch commit", e))?;
            Ok(removed)
        })
        .await
    }

    fn name(&self) -> &str {
        "redb"
    }
}
