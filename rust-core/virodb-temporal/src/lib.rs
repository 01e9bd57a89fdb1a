// SPDX-License-Identifier: PMPL-1.0-or-later
//! ViroDB Temporal
//!
//! Every change to an entity is stored as an immutable [`HistoryRecord`]
//! carrying a reversible [`Delta`]. Walking those deltas backwards from the
//! live entity rebuilds any earlier version.
//!
//! - [`diff`] computes and applies deltas.
//! - [`record`] defines the history record.
//! - [`log`] is the append-only history log over a storage backend.
//! - [`reconstruct`] rebuilds past versions without touching any store.

pub mod diff;
pub mod log;
pub mod reconstruct;
pub mod record;

use thiserror::Error;

use virodb_document::ChangeIdError;
use virodb_storage::StorageError;

pub use diff::{
    apply_backward, apply_forward, diff, Change, Delta, DeltaError, DeltaSummary, EntityPatch, FieldChange,
};
pub use log::{HistoryLog, StoredHistoryLog};
pub use reconstruct::{patch_to_version, replay_to_version, Boundary, Reconstruction};
pub use record::{ChangeMethod, HistoryRecord};

/// Temporal errors
#[derive(Error, Debug)]
pub enum TemporalError {
    #[error("change not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// The log and the live entity do not fit together.
    #[error("malformed history: {0}")]
    Malformed(String),

    #[error(transparent)]
    ChangeId(#[from] ChangeIdError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<DeltaError> for TemporalError {
    fn from(err: DeltaError) -> Self {
        TemporalError::Malformed(err.to_string())
    }
}
