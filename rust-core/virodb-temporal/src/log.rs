// SPDX-License-Identifier: PMPL-1.0-or-later
//! The append-only history log.
//!
//! Records are keyed by their change id inside the `history` namespace of a
//! storage backend, so one entity's records share the `"{entity_id}."` key
//! prefix. Appends never overwrite; deletes go through a single write batch.

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use virodb_document::{ChangeId, VersionTag};
use virodb_storage::{Collection, StorageBackend, WriteBatch};

use crate::record::HistoryRecord;
use crate::TemporalError;

/// Namespace of history records in the backend.
pub const HISTORY_NAMESPACE: &str = "history";

/// Append-only store of history records.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Store a new record. A record with the same change id is a conflict.
    async fn append(&self, record: HistoryRecord) -> Result<(), TemporalError>;

    async fn get(&self, id: &ChangeId) -> Result<HistoryRecord, TemporalError>;

    /// All records of one entity, oldest first.
    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<HistoryRecord>, TemporalError>;

    /// Delete every record of `entity_id` newer than `after`, atomically.
    /// Returns the deleted ids, oldest first.
    async fn delete_range(
        &self,
        entity_id: &str,
        after: VersionTag,
    ) -> Result<Vec<ChangeId>, TemporalError>;

    /// Delete the given records atomically. Returns how many existed.
    async fn delete(&self, ids: &[ChangeId]) -> Result<usize, TemporalError>;

    /// The newest records across all entities.
    async fn find_recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, TemporalError>;
}

/// [`HistoryLog`] over any [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct StoredHistoryLog<B: StorageBackend> {
    records: Collection<B>,
}

impl<B: StorageBackend> StoredHistoryLog<B> {
    pub fn new(backend: B) -> Self {
        Self {
            records: Collection::new(backend, HISTORY_NAMESPACE),
        }
    }

    async fn scan_entity(&self, entity_id: &str) -> Result<Vec<HistoryRecord>, TemporalError> {
        let mut records: Vec<HistoryRecord> = self
            .records
            .scan_prefix(&format!("{entity_id}."))
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        records.sort_by_key(|r| r.to_version);
        Ok(records)
    }
}

#[async_trait]
impl<B: StorageBackend> HistoryLog for StoredHistoryLog<B> {
    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn append(&self, record: HistoryRecord) -> Result<(), TemporalError> {
        let key = record.id.to_string();
        if !self.records.insert_new(&key, &record).await? {
            return Err(TemporalError::Conflict(format!(
                "history record '{key}' already exists"
            )));
        }
        debug!(method = %record.method, summary = %record.diff.summary(), "history record appended");
        Ok(())
    }

    async fn get(&self, id: &ChangeId) -> Result<HistoryRecord, TemporalError> {
        self.records
            .get(&id.to_string())
            .await?
            .ok_or_else(|| TemporalError::NotFound(id.to_string()))
    }

    async fn list_for_entity(&self, entity_id: &str) -> Result<Vec<HistoryRecord>, TemporalError> {
        self.scan_entity(entity_id).await
    }

    #[instrument(skip(self))]
    async fn delete_range(
        &self,
        entity_id: &str,
        after: VersionTag,
    ) -> Result<Vec<ChangeId>, TemporalError> {
        let doomed: Vec<ChangeId> = self
            .scan_entity(entity_id)
            .await?
            .into_iter()
            .filter(|r| r.to_version > after)
            .map(|r| r.id)
            .collect();
        self.delete(&doomed).await?;
        Ok(doomed)
    }

    async fn delete(&self, ids: &[ChangeId]) -> Result<usize, TemporalError> {
        let mut batch = WriteBatch::new();
        for id in ids {
            self.records.stage_delete(&mut batch, &id.to_string());
        }
        let removed = self.records.commit(batch).await?;
        if removed > 0 {
            info!(removed, requested = ids.len(), "history records deleted");
        }
        Ok(removed)
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, TemporalError> {
        // TODO: keep a timestamp-ordered index instead of scanning the namespace.
        let mut records: Vec<HistoryRecord> = self
            .records
            .scan_prefix("")
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::record::ChangeMethod;
    use virodb_document::Entity;
    use virodb_storage::InMemoryBackend;

    fn history(entity_id: &str, last: u64, removed: bool) -> Vec<HistoryRecord> {
        let mut records = Vec::new();
        let mut prev: Option<Entity> = None;
        for version in 0..=last {
            let mut next = Entity::new(entity_id, format!("{entity_id} virus"));
            next.version = version;
            next.fields.insert("step".into(), serde_json::json!(version));
            let method = if version == 0 { ChangeMethod::Create } else { ChangeMethod::Edit };
            let delta = diff(prev.as_ref(), Some(&next)).unwrap();
            records.push(
                HistoryRecord::new(&next.name, prev.as_ref().map(|p| p.version), version.into(), method, delta)
                    .unwrap(),
            );
            prev = Some(next);
        }
        if removed {
            let last = prev.unwrap();
            let delta = diff(Some(&last), None).unwrap();
            records.push(
                HistoryRecord::new(&last.name, Some(last.version), VersionTag::Removed, ChangeMethod::Remove, delta)
                    .unwrap(),
            );
        }
        records
    }

    async fn log_with(records: Vec<HistoryRecord>) -> StoredHistoryLog<InMemoryBackend> {
        let log = StoredHistoryLog::new(InMemoryBackend::new());
        // Append out of order; listings must not depend on it.
        for record in records.into_iter().rev() {
            log.append(record).await.unwrap();
        }
        log
    }

    #[tokio::test]
    async fn test_append_rejects_duplicate_id() {
        let records = history("foobar", 0, false);
        let log = log_with(records.clone()).await;

        let err = log.append(records[0].clone()).await.unwrap_err();
        assert!(matches!(err, TemporalError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_get_and_not_found() {
        let log = log_with(history("foobar", 1, false)).await;

        let id: ChangeId = "foobar.1".parse().unwrap();
        assert_eq!(log.get(&id).await.unwrap().from_version, Some(0));

        let missing: ChangeId = "foobar.9".parse().unwrap();
        assert!(matches!(log.get(&missing).await, Err(TemporalError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_orders_by_version_with_removal_last() {
        let mut records = history("foobar", 11, true);
        records.extend(history("foo", 2, false));
        let log = log_with(records).await;

        let listed: Vec<String> = log
            .list_for_entity("foobar")
            .await
            .unwrap()
            .iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(listed.len(), 13);
        assert_eq!(listed[2], "foobar.2");
        assert_eq!(listed[10], "foobar.10");
        assert_eq!(listed[12], "foobar.removed");

        // "foo" must not pick up "foobar" records.
        assert_eq!(log.list_for_entity("foo").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_range_removes_newer_records() {
        let log = log_with(history("foobar", 3, true)).await;

        let deleted = log.delete_range("foobar", VersionTag::Number(1)).await.unwrap();
        let deleted: Vec<String> = deleted.iter().map(ToString::to_string).collect();
        assert_eq!(deleted, vec!["foobar.2", "foobar.3", "foobar.removed"]);

        let left = log.list_for_entity("foobar").await.unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left.last().unwrap().to_version, VersionTag::Number(1));
    }

    #[tokio::test]
    async fn test_delete_counts_existing_records() {
        let log = log_with(history("foobar", 1, false)).await;
        let ids: Vec<ChangeId> = vec!["foobar.1".parse().unwrap(), "foobar.7".parse().unwrap()];

        assert_eq!(log.delete(&ids).await.unwrap(), 1);
        assert_eq!(log.delete(&ids).await.unwrap(), 0);
        assert_eq!(log.delete(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_recent_is_newest_first() {
        let mut records = history("foobar", 2, false);
        for (i, record) in records.iter_mut().enumerate() {
            record.timestamp = record.timestamp + chrono::Duration::seconds(i as i64);
        }
        let log = log_with(records).await;

        let recent = log.find_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id.to_string(), "foobar.2");
        assert_eq!(recent[1].id.to_string(), "foobar.1");
    }
}
