// SPDX-License-Identifier: PMPL-1.0-or-later
//! Live entity storage.
//!
//! Entity roots live in the `entities` namespace keyed by entity id.
//! Sequences live in the `sequences` namespace keyed by
//! `"{entity_id}/{sequence_id}"`, so all sequences of one entity are found
//! with a single prefix scan.

use tracing::{debug, instrument};

use virodb_document::{assemble, decompose, Entity, EntityRecord, JoinError, Sequence};
use virodb_storage::{Collection, StorageBackend, WriteBatch};

use crate::EngineError;

pub const ENTITY_NAMESPACE: &str = "entities";
pub const SEQUENCE_NAMESPACE: &str = "sequences";

/// Reads and writes the live (current-version) entities.
#[derive(Debug, Clone)]
pub struct EntityRepository<B: StorageBackend> {
    roots: Collection<B>,
    sequences: Collection<B>,
}

fn sequence_key(entity_id: &str, sequence_id: &str) -> String {
    format!("{entity_id}/{sequence_id}")
}

impl<B: StorageBackend + Clone> EntityRepository<B> {
    pub fn new(backend: B) -> Self {
        Self {
            roots: Collection::new(backend.clone(), ENTITY_NAMESPACE),
            sequences: Collection::new(backend, SEQUENCE_NAMESPACE),
        }
    }

    pub async fn find_root(&self, entity_id: &str) -> Result<Option<EntityRecord>, EngineError> {
        Ok(self.roots.get(entity_id).await?)
    }

    /// Every live sequence of an entity, in key order.
    pub async fn find_sequences(&self, entity_id: &str) -> Result<Vec<Sequence>, EngineError> {
        let found = self
            .sequences
            .scan_prefix::<Sequence>(&sequence_key(entity_id, ""))
            .await?;
        Ok(found.into_iter().map(|(_, seq)| seq).collect())
    }

    /// The assembled live entity, or `None` if it does not exist.
    #[instrument(skip(self))]
    pub async fn find_joined(&self, entity_id: &str) -> Result<Option<Entity>, EngineError> {
        let Some(root) = self.find_root(entity_id).await? else {
            return Ok(None);
        };
        let sequences = self.find_sequences(entity_id).await?;
        debug!(sequences = sequences.len(), "joining entity");
        Ok(Some(assemble(root, sequences)?))
    }

    /// Replace every live sequence of `entity_id` with `sequences` in one
    /// atomic batch. Returns how many old sequences were removed.
    #[instrument(skip(self, sequences), fields(count = sequences.len()))]
    pub async fn replace_sequences(
        &self,
        entity_id: &str,
        sequences: &[Sequence],
    ) -> Result<usize, EngineError> {
        let mut batch = WriteBatch::new();
        for old in self.find_sequences(entity_id).await? {
            self.sequences
                .stage_delete(&mut batch, &sequence_key(entity_id, &old.id));
        }
        for seq in sequences {
            if seq.entity_id != entity_id {
                return Err(JoinError::ForeignSequence {
                    expected: entity_id.to_string(),
                    found: seq.entity_id.clone(),
                    sequence_id: seq.id.clone(),
                }
                .into());
            }
            self.sequences
                .stage_put(&mut batch, &sequence_key(entity_id, &seq.id), seq)?;
        }
        Ok(self.sequences.commit(batch).await?)
    }

    pub async fn upsert_root(&self, root: &EntityRecord) -> Result<(), EngineError> {
        Ok(self.roots.put(&root.id, root).await?)
    }

    pub async fn delete_root(&self, entity_id: &str) -> Result<bool, EngineError> {
        Ok(self.roots.delete(entity_id).await?)
    }

    /// Make `entity` the live state: sequences first, then the root.
    pub async fn save(&self, entity: Entity) -> Result<(), EngineError> {
        let (root, sequences) = decompose(entity);
        self.replace_sequences(&root.id, &sequences).await?;
        self.upsert_root(&root).await
    }

    /// Drop the live entity: sequences first, then the root.
    pub async fn purge(&self, entity_id: &str) -> Result<(), EngineError> {
        self.replace_sequences(entity_id, &[]).await?;
        self.delete_root(entity_id).await?;
        Ok(())
    }
}
