// SPDX-License-Identifier: PMPL-1.0-or-later
//! The history engine facade.
//!
//! Every write appends its history record first and then changes the live
//! entity. A crash in between leaves a record newer than the live entity,
//! which reconstruction and revert already treat as undone.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use virodb_document::{validate_entity_id, ChangeId, Entity, VersionTag};
use virodb_storage::StorageBackend;
use virodb_temporal::{
    diff, patch_to_version, Boundary, ChangeMethod, HistoryLog, HistoryRecord, StoredHistoryLog,
};

use crate::config::EngineConfig;
use crate::locks::EntityLocks;
use crate::repository::EntityRepository;
use crate::revert::{RevertCoordinator, RevertOutcome};
use crate::EngineError;

/// Records, reconstructs and reverts entity changes over one backend.
pub struct HistoryEngine<B: StorageBackend + Clone> {
    repository: Arc<EntityRepository<B>>,
    history: Arc<StoredHistoryLog<B>>,
    coordinator: RevertCoordinator<B, StoredHistoryLog<B>>,
    locks: EntityLocks,
    page_size: usize,
}

impl<B: StorageBackend + Clone> HistoryEngine<B> {
    pub fn new(backend: B, config: &EngineConfig) -> Self {
        debug!(backend = backend.name(), page_size = config.history_page_size, "opening history engine");
        let repository = Arc::new(EntityRepository::new(backend.clone()));
        let history = Arc::new(StoredHistoryLog::new(backend));
        let coordinator = RevertCoordinator::new(Arc::clone(&repository), Arc::clone(&history));
        Self {
            repository,
            history,
            coordinator,
            locks: EntityLocks::new(),
            page_size: config.history_page_size,
        }
    }

    pub fn repository(&self) -> &EntityRepository<B> {
        &self.repository
    }

    pub fn history(&self) -> &StoredHistoryLog<B> {
        &self.history
    }

    /// The live entity.
    pub async fn get(&self, entity_id: &str) -> Result<Entity, EngineError> {
        self.repository
            .find_joined(entity_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("entity '{entity_id}'")))
    }

    /// Store a new entity at version 0 and record its creation.
    #[instrument(skip(self, entity), fields(entity_id = %entity.id))]
    pub async fn create(&self, mut entity: Entity, user_id: Option<String>) -> Result<Entity, EngineError> {
        validate_entity_id(&entity.id)?;
        let _guard = self.locks.lock(&entity.id).await;

        if self.repository.find_root(&entity.id).await?.is_some() {
            return Err(EngineError::Conflict(format!("entity '{}' already exists", entity.id)));
        }

        entity.version = 0;
        entity.canonicalize();
        entity.validate()?;

        let record = HistoryRecord::new(
            &entity.name,
            None,
            VersionTag::Number(0),
            ChangeMethod::Create,
            diff(None, Some(&entity))?,
        )?
        .with_description(format!("Created {}", entity.name))
        .by_user(user_id);

        self.history.append(record).await?;
        self.repository.save(entity.clone()).await?;

        info!(sequences = entity.sequence_count(), "created entity");
        Ok(entity)
    }

    /// Apply `mutate` to the live entity and record the change as the next
    /// version. A mutation that changes nothing records nothing.
    #[instrument(skip(self, description, user_id, mutate))]
    pub async fn edit<F>(
        &self,
        entity_id: &str,
        method: ChangeMethod,
        description: impl Into<String>,
        user_id: Option<String>,
        mutate: F,
    ) -> Result<Entity, EngineError>
    where
        F: FnOnce(&mut Entity),
    {
        let _guard = self.locks.lock(entity_id).await;
        let current = self.get(entity_id).await?;

        let mut next = current.clone();
        mutate(&mut next);
        next.id = current.id.clone();
        next.version = current.version;
        next.canonicalize();
        next.validate()?;

        if diff(Some(&current), Some(&next))?.is_empty() {
            return Ok(current);
        }

        next.version = current.version + 1;
        let delta = diff(Some(&current), Some(&next))?;
        let summary = delta.summary();

        let record = HistoryRecord::new(
            &next.name,
            Some(current.version),
            VersionTag::Number(next.version),
            method,
            delta,
        )?
        .with_description(description)
        .by_user(user_id);

        self.history.append(record).await?;
        self.repository.save(next.clone()).await?;

        info!(version = next.version, %method, %summary, "edited entity");
        Ok(next)
    }

    /// Delete the live entity, recording a removal that keeps its last
    /// snapshot.
    #[instrument(skip(self, user_id))]
    pub async fn remove(&self, entity_id: &str, user_id: Option<String>) -> Result<ChangeId, EngineError> {
        let _guard = self.locks.lock(entity_id).await;
        let current = self.get(entity_id).await?;

        let record = HistoryRecord::new(
            &current.name,
            Some(current.version),
            VersionTag::Removed,
            ChangeMethod::Remove,
            diff(Some(&current), None)?,
        )?
        .with_description(format!("Removed {}", current.name))
        .by_user(user_id);
        let id = record.id.clone();

        self.history.append(record).await?;
        self.repository.purge(entity_id).await?;

        info!(version = current.version, "removed entity");
        Ok(id)
    }

    /// The entity as it was at `target`, without changing anything.
    #[instrument(skip(self))]
    pub async fn reconstruct(&self, entity_id: &str, target: VersionTag) -> Result<Entity, EngineError> {
        let current = self.repository.find_joined(entity_id).await?;
        let history = self.history.list_for_entity(entity_id).await?;
        if current.is_none() && history.is_empty() {
            return Err(EngineError::NotFound(format!("entity '{entity_id}'")));
        }

        patch_to_version(current.as_ref(), &history, target, Boundary::AtTarget)?
            .snapshot
            .ok_or_else(|| {
                EngineError::NotFound(format!("entity '{entity_id}' does not exist at version {target}"))
            })
    }

    /// Restore the entity to the state `change_id` produced and delete all
    /// newer history.
    pub async fn revert(&self, change_id: &ChangeId) -> Result<RevertOutcome, EngineError> {
        let _guard = self.locks.lock(change_id.entity_id()).await;
        self.coordinator.revert(change_id).await
    }

    /// History of one entity, oldest first.
    pub async fn history_for(&self, entity_id: &str) -> Result<Vec<HistoryRecord>, EngineError> {
        Ok(self.history.list_for_entity(entity_id).await?)
    }

    /// Newest records across all entities; `limit` defaults to the
    /// configured page size.
    pub async fn find_recent(&self, limit: Option<usize>) -> Result<Vec<HistoryRecord>, EngineError> {
        Ok(self.history.find_recent(limit.unwrap_or(self.page_size)).await?)
    }

    pub async fn get_change(&self, change_id: &ChangeId) -> Result<HistoryRecord, EngineError> {
        Ok(self.history.get(change_id).await?)
    }
}
