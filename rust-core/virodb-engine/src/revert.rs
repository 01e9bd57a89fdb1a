// SPDX-License-Identifier: PMPL-1.0-or-later
//! Reverting an entity to an earlier change.
//!
//! A revert runs through fixed stages:
//!
//! ```text
//! Start -> Reconstructed -> SequencesReplaced -> RootReplaced -> LogTrimmed
//! ```
//!
//! Each store write is atomic on its own, but the stages together are not.
//! The log is trimmed last, so a revert interrupted at any stage can simply
//! be run again and converges on the same state and trim set:
//!
//! - after `RootReplaced`, the records newer than the live entity are
//!   recognised as already undone;
//! - after `SequencesReplaced`, the live root is still at its old version
//!   while its sequences already belong to the target. The walk back from
//!   that mix fails, so the target is instead replayed forward from the log,
//!   but only when the live data matches exactly that interrupted state.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use virodb_document::{assemble, decompose, ChangeId, Entity, EntityRecord, Sequence, VersionTag};
use virodb_storage::StorageBackend;
use virodb_temporal::{
    patch_to_version, replay_to_version, Boundary, HistoryLog, HistoryRecord, Reconstruction, TemporalError,
};

use crate::repository::EntityRepository;
use crate::EngineError;

/// Progress of a single revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RevertStage {
    Start,
    Reconstructed,
    SequencesReplaced,
    RootReplaced,
    LogTrimmed,
}

impl fmt::Display for RevertStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RevertStage::Start => "start",
            RevertStage::Reconstructed => "reconstructed",
            RevertStage::SequencesReplaced => "sequences_replaced",
            RevertStage::RootReplaced => "root_replaced",
            RevertStage::LogTrimmed => "log_trimmed",
        };
        f.write_str(name)
    }
}

/// What a completed revert did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevertOutcome {
    pub entity_id: String,
    pub target: VersionTag,
    /// Deleted history records, newest first.
    pub reverted: Vec<ChangeId>,
    /// The live entity after the revert; `None` if it no longer exists.
    pub restored: Option<Entity>,
}

/// Runs reverts against one entity repository and history log.
///
/// Callers must hold the entity's write lock for the duration of
/// [`revert`](Self::revert).
pub struct RevertCoordinator<B: StorageBackend, L: HistoryLog> {
    repository: Arc<EntityRepository<B>>,
    history: Arc<L>,
}

impl<B, L> RevertCoordinator<B, L>
where
    B: StorageBackend + Clone,
    L: HistoryLog,
{
    pub fn new(repository: Arc<EntityRepository<B>>, history: Arc<L>) -> Self {
        Self {
            repository,
            history,
        }
    }

    /// Restore the entity named by `change_id` to the state that change
    /// produced and delete every newer history record.
    #[instrument(skip(self, change_id), fields(change_id = %change_id))]
    pub async fn revert(&self, change_id: &ChangeId) -> Result<RevertOutcome, EngineError> {
        let mut stage = RevertStage::Start;
        self.history.get(change_id).await?;
        let entity_id = change_id.entity_id();
        let target = change_id.version();

        let root = self.repository.find_root(entity_id).await?;
        let live_sequences = self.repository.find_sequences(entity_id).await?;
        let history = self.history.list_for_entity(entity_id).await?;
        let reconstruction = reconstruct_for_revert(root, live_sequences, &history, target)?;
        advance(&mut stage, RevertStage::Reconstructed);

        let restored = reconstruction.snapshot;
        let (root, sequences) = match restored.clone() {
            Some(entity) => {
                let (root, sequences) = decompose(entity);
                (Some(root), sequences)
            }
            None => (None, Vec::new()),
        };

        self.repository
            .replace_sequences(entity_id, &sequences)
            .await?;
        advance(&mut stage, RevertStage::SequencesReplaced);

        match &root {
            Some(root) => self.repository.upsert_root(root).await?,
            None => {
                self.repository.delete_root(entity_id).await?;
            }
        }
        advance(&mut stage, RevertStage::RootReplaced);

        self.history.delete(&reconstruction.reverted).await?;
        advance(&mut stage, RevertStage::LogTrimmed);

        info!(
            entity_id,
            target = %target,
            reverted = reconstruction.reverted.len(),
            exists = restored.is_some(),
            "reverted entity"
        );

        Ok(RevertOutcome {
            entity_id: entity_id.to_string(),
            target,
            reverted: reconstruction.reverted,
            restored,
        })
    }
}

fn advance(stage: &mut RevertStage, next: RevertStage) {
    debug!(from = %stage, to = %next, "revert stage");
    *stage = next;
}

/// Walk back from the live entity, falling back to a forward replay when the
/// live data is exactly what an interrupted revert leaves behind.
fn reconstruct_for_revert(
    root: Option<EntityRecord>,
    sequences: Vec<Sequence>,
    history: &[HistoryRecord],
    target: VersionTag,
) -> Result<Reconstruction, EngineError> {
    let failure = match root.clone().map(|r| assemble(r, sequences.clone())).transpose() {
        Ok(current) => match patch_to_version(current.as_ref(), history, target, Boundary::AtTarget) {
            Ok(reconstruction) => return Ok(reconstruction),
            Err(TemporalError::Malformed(msg)) => EngineError::Malformed(msg),
            Err(other) => return Err(other.into()),
        },
        Err(join) => EngineError::Join(join),
    };

    match root.as_ref().and_then(|root| resume_interrupted(root, &sequences, history, target)) {
        Some(reconstruction) => {
            warn!(
                %target,
                "live entity is mid-revert; rebuilding the target from the log"
            );
            Ok(reconstruction)
        }
        None => {
            error!(%target, error = %failure, "live entity does not match its history");
            Err(failure)
        }
    }
}

/// The reconstruction for a revert that died after replacing sequences but
/// before replacing the root, or `None` if the live data is anything else.
fn resume_interrupted(
    root: &EntityRecord,
    sequences: &[Sequence],
    history: &[HistoryRecord],
    target: VersionTag,
) -> Option<Reconstruction> {
    let live_version = VersionTag::Number(root.version);
    if target > live_version {
        return None;
    }

    let recorded = replay_to_version(history, live_version).ok()??;
    if decompose(recorded).0 != *root {
        return None;
    }

    let snapshot = replay_to_version(history, target).ok()?;
    let mut expected = snapshot
        .clone()
        .map(|entity| decompose(entity).1)
        .unwrap_or_default();
    expected.sort_by(|a, b| a.id.cmp(&b.id));
    let mut live = sequences.to_vec();
    live.sort_by(|a, b| a.id.cmp(&b.id));
    if live != expected {
        return None;
    }

    let mut newer: Vec<&HistoryRecord> = history.iter().filter(|r| r.to_version > target).collect();
    newer.sort_by(|a, b| b.to_version.cmp(&a.to_version));
    Some(Reconstruction {
        snapshot,
        reverted: newer.into_iter().map(|r| r.id.clone()).collect(),
    })
}
