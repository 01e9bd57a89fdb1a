// SPDX-License-Identifier: PMPL-1.0-or-later
//! End-to-end revert and reconstruction scenarios

use virodb_document::{decompose, ChangeId, Entity, Isolate, Sequence, VersionTag};
use virodb_engine::{EngineConfig, HistoryEngine};
use virodb_storage::{InMemoryBackend, StorageBackend};
use virodb_temporal::{patch_to_version, Boundary, ChangeMethod, HistoryLog};

fn engine() -> HistoryEngine<InMemoryBackend> {
    HistoryEngine::new(InMemoryBackend::new(), &EngineConfig::default())
}

fn change(id: &str) -> ChangeId {
    id.parse().unwrap()
}

fn foobar_v0() -> Entity {
    Entity::new("foobar", "Foobar virus")
        .with_abbreviation("FBV")
        .with_isolate(
            Isolate::new("baz", "isolate", "Baz")
                .as_default()
                .with_sequence(Sequence::new("test_1", "foobar", "baz", "ATAGGGACATA")),
        )
}

/// v0, then v1 adds isolate "foo" with sequence "test_2".
async fn with_two_versions<B: StorageBackend + Clone>(engine: &HistoryEngine<B>) -> (Entity, Entity) {
    let v0 = engine.create(foobar_v0(), Some("test".into())).await.unwrap();
    let v1 = engine
        .edit("foobar", ChangeMethod::AddIsolate, "Added isolate Foo", Some("test".into()), |e| {
            e.isolates.push(
                Isolate::new("foo", "isolate", "Foo")
                    .with_sequence(Sequence::new("test_2", "foobar", "foo", "ATAGGGACATA")),
            );
        })
        .await
        .unwrap();
    (v0, v1)
}

fn ids(changes: &[ChangeId]) -> Vec<String> {
    changes.iter().map(ToString::to_string).collect()
}

async fn logged_versions<B: StorageBackend + Clone>(engine: &HistoryEngine<B>, entity_id: &str) -> Vec<VersionTag> {
    engine
        .history_for(entity_id)
        .await
        .unwrap()
        .iter()
        .map(|r| r.to_version)
        .collect()
}

#[tokio::test]
async fn test_revert_to_creation_keeps_version_zero() {
    let engine = engine();
    let (v0, v1) = with_two_versions(&engine).await;
    assert_eq!(v1.version, 1);

    let outcome = engine.revert(&change("foobar.0")).await.unwrap();

    assert_eq!(ids(&outcome.reverted), vec!["foobar.1"]);
    assert_eq!(outcome.restored.as_ref(), Some(&v0));

    let live = engine.get("foobar").await.unwrap();
    assert_eq!(live, v0);

    let sequences = engine.repository().find_sequences("foobar").await.unwrap();
    let sequence_ids: Vec<&str> = sequences.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(sequence_ids, vec!["test_1"]);

    assert_eq!(logged_versions(&engine, "foobar").await, vec![VersionTag::Number(0)]);
}

#[tokio::test]
async fn test_deleted_entity_can_be_reconstructed_and_restored() {
    let engine = engine();
    let (_, v1) = with_two_versions(&engine).await;
    engine.remove("foobar", Some("test".into())).await.unwrap();

    assert!(engine.repository().find_root("foobar").await.unwrap().is_none());
    assert!(engine.repository().find_sequences("foobar").await.unwrap().is_empty());

    let rebuilt = engine.reconstruct("foobar", VersionTag::Number(1)).await.unwrap();
    assert_eq!(rebuilt, v1);

    let outcome = engine.revert(&change("foobar.1")).await.unwrap();
    assert_eq!(ids(&outcome.reverted), vec!["foobar.removed"]);
    assert_eq!(engine.get("foobar").await.unwrap(), v1);
    assert_eq!(engine.repository().find_sequences("foobar").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_reverting_through_deletion_to_creation() {
    let engine = engine();
    let (v0, _) = with_two_versions(&engine).await;
    engine.remove("foobar", None).await.unwrap();

    let outcome = engine.revert(&change("foobar.0")).await.unwrap();
    assert_eq!(ids(&outcome.reverted), vec!["foobar.removed", "foobar.1"]);
    assert_eq!(engine.get("foobar").await.unwrap(), v0);
}

#[tokio::test]
async fn test_reverting_the_removal_itself_keeps_it() {
    let engine = engine();
    with_two_versions(&engine).await;
    engine.remove("foobar", None).await.unwrap();

    // The removal is the newest record, so nothing lies after it to undo and
    // the log still ends at "removed" while the entity is gone.
    let outcome = engine.revert(&change("foobar.removed")).await.unwrap();
    assert_eq!(outcome.target, VersionTag::Removed);
    assert!(outcome.reverted.is_empty());
    assert_eq!(outcome.restored, None);

    assert_eq!(engine.get("foobar").await.unwrap_err().status_code(), 404);
    assert!(engine.repository().find_sequences("foobar").await.unwrap().is_empty());
    assert_eq!(
        logged_versions(&engine, "foobar").await,
        vec![VersionTag::Number(0), VersionTag::Number(1), VersionTag::Removed]
    );
}

#[tokio::test]
async fn test_null_field_is_stored_and_undone() {
    let engine = engine();
    let v0 = engine.create(foobar_v0(), None).await.unwrap();
    let v1 = engine
        .edit("foobar", ChangeMethod::Edit, "Cleared segment", None, |e| {
            e.fields.insert("segment".into(), serde_json::Value::Null);
        })
        .await
        .unwrap();
    assert_eq!(v1.version, 1);
    assert_eq!(v1.fields.get("segment"), Some(&serde_json::Value::Null));

    assert_eq!(engine.reconstruct("foobar", VersionTag::Number(0)).await.unwrap(), v0);
    assert_eq!(engine.reconstruct("foobar", VersionTag::Number(1)).await.unwrap(), v1);

    let outcome = engine.revert(&change("foobar.0")).await.unwrap();
    assert_eq!(ids(&outcome.reverted), vec!["foobar.1"]);
    assert_eq!(outcome.restored.as_ref(), Some(&v0));
    assert!(!engine.get("foobar").await.unwrap().fields.contains_key("segment"));
}

#[tokio::test]
async fn test_future_version_is_rejected() {
    let engine = engine();
    with_two_versions(&engine).await;

    let err = engine.reconstruct("foobar", VersionTag::Number(5)).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = engine.reconstruct("foobar", VersionTag::Removed).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    // No record carries that id, so a revert has nothing to target.
    let err = engine.revert(&change("foobar.5")).await.unwrap_err();
    assert_eq!(err.status_code(), 404);

    // Nothing changed.
    assert_eq!(engine.get("foobar").await.unwrap().version, 1);
    assert_eq!(logged_versions(&engine, "foobar").await.len(), 2);
}

#[tokio::test]
async fn test_revert_is_idempotent() {
    let engine = engine();
    with_two_versions(&engine).await;

    let first = engine.revert(&change("foobar.0")).await.unwrap();
    let second = engine.revert(&change("foobar.0")).await.unwrap();

    assert_eq!(first.restored, second.restored);
    assert_eq!(first.reverted.len(), 1);
    assert!(second.reverted.is_empty());
}

#[tokio::test]
async fn test_log_stays_contiguous_across_reverts() {
    let engine = engine();
    with_two_versions(&engine).await;
    for n in 0..3 {
        engine
            .edit("foobar", ChangeMethod::Edit, format!("edit {n}"), None, |e| {
                e.fields.insert("revision".into(), serde_json::json!(n));
            })
            .await
            .unwrap();
    }
    assert_eq!(engine.get("foobar").await.unwrap().version, 4);

    engine.revert(&change("foobar.2")).await.unwrap();
    assert_eq!(
        logged_versions(&engine, "foobar").await,
        vec![VersionTag::Number(0), VersionTag::Number(1), VersionTag::Number(2)]
    );

    // The next edit reuses the trimmed version number.
    let next = engine
        .edit("foobar", ChangeMethod::Edit, "after revert", None, |e| {
            e.name = "Foobar virus B".into();
        })
        .await
        .unwrap();
    assert_eq!(next.version, 3);
    assert_eq!(engine.get_change(&change("foobar.3")).await.unwrap().from_version, Some(2));

    // Every record steps exactly one version from its predecessor.
    let history = engine.history_for("foobar").await.unwrap();
    for pair in history.windows(2) {
        assert_eq!(
            pair[1].from_version.map(VersionTag::Number),
            Some(pair[0].to_version)
        );
    }
}

#[tokio::test]
async fn test_boundary_choice_over_a_live_history() {
    let engine = engine();
    let (v0, v1) = with_two_versions(&engine).await;

    let current = engine.get("foobar").await.unwrap();
    let history = engine.history_for("foobar").await.unwrap();

    let at = patch_to_version(Some(&current), &history, VersionTag::Number(1), Boundary::AtTarget).unwrap();
    let before =
        patch_to_version(Some(&current), &history, VersionTag::Number(1), Boundary::BeforeTarget).unwrap();

    assert_eq!(at.snapshot, Some(v1));
    assert!(at.reverted.is_empty());
    assert_eq!(before.snapshot, Some(v0));
    assert_eq!(ids(&before.reverted), vec!["foobar.1"]);
}

/// Replay a revert to `foobar.0` by hand and stop after `stop` store writes,
/// as if the process had died there.
async fn interrupted_revert(engine: &HistoryEngine<InMemoryBackend>, stop: usize) {
    let current = engine.repository().find_joined("foobar").await.unwrap();
    let history = engine.history_for("foobar").await.unwrap();
    let reconstruction =
        patch_to_version(current.as_ref(), &history, VersionTag::Number(0), Boundary::AtTarget).unwrap();
    let (root, sequences) = decompose(reconstruction.snapshot.unwrap());

    if stop >= 1 {
        engine.repository().replace_sequences("foobar", &sequences).await.unwrap();
    }
    if stop >= 2 {
        engine.repository().upsert_root(&root).await.unwrap();
    }
}

#[tokio::test]
async fn test_interrupted_revert_converges_on_retry() {
    for stop in 0..=2 {
        let engine = engine();
        let (v0, _) = with_two_versions(&engine).await;

        interrupted_revert(&engine, stop).await;
        let outcome = engine.revert(&change("foobar.0")).await.unwrap();

        assert_eq!(outcome.restored.as_ref(), Some(&v0), "stopped after {stop} writes");
        assert_eq!(ids(&outcome.reverted), vec!["foobar.1"], "stopped after {stop} writes");
        assert_eq!(engine.get("foobar").await.unwrap(), v0);
        assert_eq!(logged_versions(&engine, "foobar").await, vec![VersionTag::Number(0)]);
    }
}

#[tokio::test]
async fn test_record_appended_without_live_write_is_ignored() {
    let engine = engine();
    let (v0, v1) = with_two_versions(&engine).await;

    // An edit that died after appending its record but before saving.
    let mut v2 = v1.clone();
    v2.version = 2;
    v2.name = "Foobar virus C".into();
    let record = virodb_temporal::HistoryRecord::new(
        &v2.name,
        Some(1),
        VersionTag::Number(2),
        ChangeMethod::Edit,
        virodb_temporal::diff(Some(&v1), Some(&v2)).unwrap(),
    )
    .unwrap();
    engine.history().append(record).await.unwrap();

    assert_eq!(engine.reconstruct("foobar", VersionTag::Number(0)).await.unwrap(), v0);

    let outcome = engine.revert(&change("foobar.1")).await.unwrap();
    assert_eq!(ids(&outcome.reverted), vec!["foobar.2"]);
    assert_eq!(engine.get("foobar").await.unwrap(), v1);
}

#[tokio::test]
async fn test_entities_do_not_share_history() {
    let engine = engine();
    with_two_versions(&engine).await;

    let mut other = foobar_v0();
    other.id = "foo".into();
    other.canonicalize();
    engine.create(other, None).await.unwrap();

    engine.revert(&change("foobar.0")).await.unwrap();
    assert_eq!(logged_versions(&engine, "foo").await, vec![VersionTag::Number(0)]);
    assert_eq!(engine.find_recent(None).await.unwrap().len(), 2);
}

#[cfg(feature = "redb-backend")]
#[tokio::test]
async fn test_revert_survives_reopen_with_redb() {
    use virodb_storage::RedbBackend;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("virodb.redb");

    let v0 = {
        let engine = HistoryEngine::new(RedbBackend::open(&path).unwrap(), &EngineConfig::default());
        let (v0, _) = with_two_versions(&engine).await;
        engine.revert(&change("foobar.0")).await.unwrap();
        v0
    };

    let engine = HistoryEngine::new(RedbBackend::open(&path).unwrap(), &EngineConfig::default());
    assert_eq!(engine.get("foobar").await.unwrap(), v0);
    assert_eq!(engine.history().list_for_entity("foobar").await.unwrap().len(), 1);
}
