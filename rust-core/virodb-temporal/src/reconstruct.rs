// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rebuilding past versions of an entity.
//!
//! [`patch_to_version`] starts from the live snapshot and applies recorded
//! deltas backwards, newest first, until it reaches the requested version.
//! It is a pure function: nothing is read from or written to a store, and
//! every step produces a new snapshot.
//!
//! [`replay_to_version`] goes the other way, applying the log forward from
//! the creation record. It needs no live snapshot at all.

use tracing::{debug, warn};

use virodb_document::{ChangeId, Entity, VersionTag};

use crate::diff::{apply_backward, apply_forward};
use crate::record::HistoryRecord;
use crate::TemporalError;

/// Which records a walk back to a target version undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Undo records newer than the target; the result is the target version.
    AtTarget,
    /// Also undo the record that produced the target; the result is the
    /// version before it.
    BeforeTarget,
}

impl Boundary {
    fn undoes(self, record: VersionTag, target: VersionTag) -> bool {
        match self {
            Boundary::AtTarget => record > target,
            Boundary::BeforeTarget => record >= target,
        }
    }
}

/// Result of a walk back through history.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    /// The rebuilt snapshot, `None` if the entity did not exist at that point.
    pub snapshot: Option<Entity>,
    /// Ids of every record the walk passed, newest first. These are the
    /// records a revert to the same target deletes.
    pub reverted: Vec<ChangeId>,
}

/// Where the live side of the history stands.
#[derive(Debug, Clone, Copy)]
enum Head {
    /// A live entity at this version.
    Live(u64),
    /// The entity was removed after reaching this version.
    Removed(u64),
    /// No live entity and no removal record.
    Missing,
}

/// Rebuild the state of an entity at `target`.
///
/// `current` is the live snapshot (or `None` if the entity does not exist)
/// and `history` every record of that entity, in any order.
///
/// Records newer than the live version are leftovers of an interrupted
/// revert: they are included in `reverted` without being applied.
pub fn patch_to_version(
    current: Option<&Entity>,
    history: &[HistoryRecord],
    target: VersionTag,
    boundary: Boundary,
) -> Result<Reconstruction, TemporalError> {
    let mut records: Vec<&HistoryRecord> = history.iter().collect();
    records.sort_by_key(|r| r.to_version);

    if let Some(entity) = current {
        if let Some(foreign) = records.iter().find(|r| r.entity_id != entity.id) {
            return Err(TemporalError::Malformed(format!(
                "record '{}' does not belong to entity '{}'",
                foreign.id, entity.id
            )));
        }
    }

    let removal = records
        .iter()
        .find(|r| r.to_version.is_removed())
        .copied();

    let head = match (current, removal) {
        (Some(entity), _) => Head::Live(entity.version),
        (None, Some(record)) => Head::Removed(record.from_version.ok_or_else(|| {
            TemporalError::Malformed(format!("removal record '{}' has no from_version", record.id))
        })?),
        (None, None) => Head::Missing,
    };

    match (target, head) {
        (VersionTag::Removed, _) if removal.is_none() => {
            return Err(TemporalError::InvalidVersion(
                "entity has never been removed".to_string(),
            ));
        }
        (VersionTag::Number(t), Head::Live(newest) | Head::Removed(newest)) if t > newest => {
            return Err(TemporalError::InvalidVersion(format!(
                "version {t} is newer than the current version {newest}"
            )));
        }
        _ => {}
    }

    let is_stale = |record: &HistoryRecord| match head {
        Head::Live(version) => record.to_version > VersionTag::Number(version),
        Head::Removed(_) => false,
        Head::Missing => true,
    };

    let mut snapshot = current.cloned();
    let mut reverted = Vec::new();
    let mut walked = 0;

    for record in records.iter().rev().take_while(|r| boundary.undoes(r.to_version, target)) {
        walked += 1;
        reverted.push(record.id.clone());

        if is_stale(*record) {
            warn!(
                change_id = %record.id,
                "record is newer than the live entity; treating it as already undone"
            );
            continue;
        }

        snapshot = apply_backward(snapshot.as_ref(), &record.diff)?;
        debug!(change_id = %record.id, "undid change");
    }

    if matches!(head, Head::Missing) && walked < records.len() {
        return Err(TemporalError::Malformed(format!(
            "entity '{}' has no live snapshot or removal record to rebuild from",
            records[0].entity_id
        )));
    }

    if let (Some(entity), VersionTag::Number(t), Boundary::AtTarget) = (&snapshot, target, boundary) {
        if entity.version != t {
            return Err(TemporalError::Malformed(format!(
                "walk ended at version {} instead of {t}",
                entity.version
            )));
        }
    }

    Ok(Reconstruction { snapshot, reverted })
}

/// Rebuild the state at `target` by replaying the log forward from the
/// creation record.
pub fn replay_to_version(
    history: &[HistoryRecord],
    target: VersionTag,
) -> Result<Option<Entity>, TemporalError> {
    let mut records: Vec<&HistoryRecord> = history.iter().collect();
    records.sort_by_key(|r| r.to_version);

    if !records.iter().any(|r| r.to_version == target) {
        return Err(TemporalError::NotFound(format!("no record produced version {target}")));
    }

    let mut snapshot = None;
    for record in records.iter().take_while(|r| r.to_version <= target) {
        snapshot = apply_forward(snapshot.as_ref(), &record.diff)?;
    }
    Ok(snapshot)
}
