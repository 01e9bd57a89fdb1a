// SPDX-License-Identifier: PMPL-1.0-or-later
//! Joining an entity root with its detached sequences.
//!
//! [`assemble`] nests sequence records under their isolates to build the
//! self-contained [`Entity`] snapshot; [`decompose`] splits a snapshot back
//! into the root record and flat sequence records before persisting.
//!
//! Referential integrity between sequences and isolates is only checked here,
//! lazily. A sequence pointing at a missing isolate is an error, never
//! silently dropped.

use std::collections::HashMap;

use thiserror::Error;
use tracing::error;

use crate::{Entity, EntityRecord, Isolate, IsolateRecord, Sequence};

/// Integrity failures found while assembling an entity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JoinError {
    /// A sequence references an isolate the root record does not contain.
    #[error("sequence '{sequence_id}' references isolate '{isolate_id}' missing from entity '{entity_id}'")]
    IncompleteJoin {
        entity_id: String,
        isolate_id: String,
        sequence_id: String,
    },

    /// A sequence handed to the join belongs to a different entity.
    #[error("sequence '{sequence_id}' belongs to entity '{found}', not '{expected}'")]
    ForeignSequence {
        expected: String,
        found: String,
        sequence_id: String,
    },
}

/// Nest `sequences` under the matching isolates of `root`.
///
/// Sequences inside each isolate come out ordered by id, so the result does
/// not depend on the order the store returned them in. Isolates keep the
/// root's order.
pub fn assemble(root: EntityRecord, sequences: Vec<Sequence>) -> Result<Entity, JoinError> {
    let mut slots: HashMap<String, Vec<Sequence>> = root
        .isolates
        .iter()
        .map(|isolate| (isolate.id.clone(), Vec::new()))
        .collect();

    for sequence in sequences {
        if sequence.entity_id != root.id {
            error!(
                entity_id = %root.id,
                sequence_id = %sequence.id,
                "sequence joined against the wrong entity"
            );
            return Err(JoinError::ForeignSequence {
                expected: root.id.clone(),
                found: sequence.entity_id,
                sequence_id: sequence.id,
            });
        }
        match slots.get_mut(&sequence.isolate_id) {
            Some(slot) => slot.push(sequence),
            None => {
                error!(
                    entity_id = %root.id,
                    isolate_id = %sequence.isolate_id,
                    sequence_id = %sequence.id,
                    "sequence references a missing isolate"
                );
                return Err(JoinError::IncompleteJoin {
                    entity_id: root.id.clone(),
                    isolate_id: sequence.isolate_id,
                    sequence_id: sequence.id,
                });
            }
        }
    }

    let isolates = root
        .isolates
        .into_iter()
        .map(|record| {
            let mut sequences = slots.remove(&record.id).unwrap_or_default();
            sequences.sort_by(|a, b| a.id.cmp(&b.id));
            Isolate {
                id: record.id,
                source_type: record.source_type,
                source_name: record.source_name,
                default: record.default,
                sequences,
            }
        })
        .collect();

    Ok(Entity {
        id: root.id,
        version: root.version,
        name: root.name,
        abbreviation: root.abbreviation,
        fields: root.fields,
        isolates,
    })
}

/// Split an assembled entity into its root record and flat sequences.
///
/// Each sequence's back-references are taken from where it sits in the
/// snapshot, not from the values it carries.
pub fn decompose(entity: Entity) -> (EntityRecord, Vec<Sequence>) {
    let mut sequences = Vec::with_capacity(entity.sequence_count());
    let mut isolates = Vec::with_capacity(entity.isolates.len());

    for isolate in entity.isolates {
        for mut sequence in isolate.sequences {
            sequence.entity_id = entity.id.clone();
            sequence.isolate_id = isolate.id.clone();
            sequences.push(sequence);
        }
        isolates.push(IsolateRecord {
            id: isolate.id,
            source_type: isolate.source_type,
            source_name: isolate.source_name,
            default: isolate.default,
        });
    }

    let root = EntityRecord {
        id: entity.id,
        version: entity.version,
        name: entity.name,
        abbreviation: entity.abbreviation,
        fields: entity.fields,
        isolates,
    };
    (root, sequences)
}
