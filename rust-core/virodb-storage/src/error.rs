// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Failures of the ViroDB document store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be written as JSON.
    #[error("cannot encode document '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Stored bytes are not a valid document of the requested type.
    #[error("cannot decode document '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backend returned data it should never have stored.
    #[error("corrupted store: {0}")]
    Corrupted(String),

    /// The database file is locked, missing or a worker task was lost.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
