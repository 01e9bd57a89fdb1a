// SPDX-License-Identifier: PMPL-1.0-or-later
//
// ViroDB storage layer.
//
// The history engine treats its persistent store as a plain document store:
// find by key, scan by key prefix, insert, replace and delete. This crate
// defines that contract over opaque bytes and layers serde-typed collections
// on top of it.
//
// # Modules
//
// - [`backend`] -- The `StorageBackend` trait and the `WriteBatch` used for
//   atomic multi-key writes.
// - [`error`] -- The `StorageError` enum covering backend failure modes.
// - [`memory`] -- An in-memory `BTreeMap` backend for tests and ephemeral use.
// - [`typed`] -- `Collection`, a JSON-typed, namespaced view of a backend.
//
// # Example
//
// ```rust
// use virodb_storage::memory::InMemoryBackend;
// use virodb_storage::typed::Collection;
//
// # tokio_test::block_on(async {
// let backend = InMemoryBackend::new();
// let entities = Collection::new(backend, "entities");
// entities.put("foobar", &serde_json::json!({"name": "Foobar virus"})).await.unwrap();
//
// let val: serde_json::Value = entities.get("foobar").await.unwrap().unwrap();
// assert_eq!(val["name"], "Foobar virus");
// # });
// ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod typed;

#[cfg(feature = "redb-backend")]
pub mod redb_backend;

pub use backend::{StorageBackend, WriteBatch, WriteOp};
pub use error::StorageError;
pub use memory::InMemoryBackend;
pub use typed::Collection;

#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;
