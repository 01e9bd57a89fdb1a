// SPDX-License-Identifier: PMPL-1.0-or-later
//! ViroDB Engine
//!
//! Ties the live entity store to its history log. Every write made through
//! [`HistoryEngine`] appends a history record before touching the live
//! entity, and [`RevertCoordinator`] rolls an entity back to an earlier
//! change, rewriting its sequences and root and then trimming the log.

pub mod config;
pub mod locks;
pub mod repository;
pub mod revert;
pub mod service;

use thiserror::Error;

use virodb_document::{ChangeIdError, EntityError, JoinError};
use virodb_storage::StorageError;
use virodb_temporal::{DeltaError, TemporalError};

pub use config::{BackendKind, EngineConfig};
pub use locks::EntityLocks;
pub use repository::EntityRepository;
pub use revert::{RevertCoordinator, RevertOutcome, RevertStage};
pub use service::HistoryEngine;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid change id: {0}")]
    InvalidChangeId(#[from] ChangeIdError),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid entity: {0}")]
    InvalidEntity(#[from] EntityError),

    #[error("malformed delta: {0}")]
    Malformed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity error: {0}")]
    Join(#[from] JoinError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// HTTP status a front end should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::NotFound(_) => 404,
            EngineError::InvalidChangeId(_)
            | EngineError::InvalidVersion(_)
            | EngineError::InvalidEntity(_)
            | EngineError::Malformed(_) => 400,
            EngineError::Conflict(_) => 409,
            EngineError::Join(_) | EngineError::Storage(_) | EngineError::Config(_) => 500,
        }
    }
}

impl From<TemporalError> for EngineError {
    fn from(err: TemporalError) -> Self {
        match err {
            TemporalError::NotFound(msg) => EngineError::NotFound(msg),
            TemporalError::Conflict(msg) => EngineError::Conflict(msg),
            TemporalError::InvalidVersion(msg) => EngineError::InvalidVersion(msg),
            TemporalError::Malformed(msg) => EngineError::Malformed(msg),
            TemporalError::ChangeId(e) => EngineError::InvalidChangeId(e),
            TemporalError::Storage(e) => EngineError::Storage(e),
        }
    }
}

impl From<DeltaError> for EngineError {
    fn from(err: DeltaError) -> Self {
        EngineError::Malformed(err.to_string())
    }
}
