// SPDX-License-Identifier: PMPL-1.0-or-later
//! Reversible structural diffs between entity snapshots.
//!
//! A [`Delta`] records everything needed to move an entity snapshot one
//! version forward and, inverted, one version back. Collections (isolates,
//! and sequences inside isolates) are matched by id rather than by position:
//! editing an isolate is a [`Edit::Modified`] patch, and a pure reordering is
//! an order change with no adds or removes.
//!
//! Application is strict. Each recorded `old` value must match the snapshot
//! being patched, so applying a delta to the wrong base version fails with
//! [`DeltaError::Malformed`] instead of producing a silently wrong document.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use virodb_document::{Entity, Isolate, Sequence};

/// Failures computing or applying a delta.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeltaError {
    /// Both sides of a diff are absent; there is nothing to compare.
    #[error("cannot diff two absent snapshots")]
    Incomparable,

    /// The delta does not fit the snapshot it is applied to.
    #[error("malformed delta: {0}")]
    Malformed(String),
}

fn malformed(message: impl Into<String>) -> DeltaError {
    DeltaError::Malformed(message.into())
}

/// A single value before and after a change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

impl<T: Clone + PartialEq + fmt::Debug> Change<T> {
    /// `Some` when the values differ.
    pub fn between(old: &T, new: &T) -> Option<Self> {
        (old != new).then(|| Change {
            old: old.clone(),
            new: new.clone(),
        })
    }

    pub fn inverted(&self) -> Self {
        Change {
            old: self.new.clone(),
            new: self.old.clone(),
        }
    }

    fn apply_to(&self, slot: &mut T, what: &str) -> Result<(), DeltaError> {
        if *slot != self.old {
            return Err(malformed(format!(
                "{what}: expected {:?}, found {:?}",
                self.old, slot
            )));
        }
        *slot = self.new.clone();
        Ok(())
    }
}

fn apply_opt<T: Clone + PartialEq + fmt::Debug>(
    change: &Option<Change<T>>,
    slot: &mut T,
    what: &str,
) -> Result<(), DeltaError> {
    match change {
        Some(change) => change.apply_to(slot, what),
        None => Ok(()),
    }
}

fn invert_opt<T: Clone + PartialEq + fmt::Debug>(change: &Option<Change<T>>) -> Option<Change<T>> {
    change.as_ref().map(Change::inverted)
}

// ---------------------------------------------------------------------------
// Id-keyed collections
// ---------------------------------------------------------------------------

/// Items of a collection diffed by identity.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Isolate {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Sequence {
    fn key(&self) -> &str {
        &self.id
    }
}

/// A patch to one keyed item that survives a change.
pub trait ItemPatch<T>: Sized {
    fn key(&self) -> &str;
    fn apply_to(&self, item: &mut T) -> Result<(), DeltaError>;
    fn inverted(&self) -> Self;
}

/// One edit to an id-keyed collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edit<T, P> {
    Added { item: T },
    Removed { item: T },
    Modified { patch: P },
}

impl<T: Keyed + Clone, P: ItemPatch<T> + Clone> Edit<T, P> {
    fn inverted(&self) -> Self {
        match self {
            Edit::Added { item } => Edit::Removed { item: item.clone() },
            Edit::Removed { item } => Edit::Added { item: item.clone() },
            Edit::Modified { patch } => Edit::Modified {
                patch: patch.inverted(),
            },
        }
    }
}

pub type IsolateEdit = Edit<Isolate, IsolatePatch>;
pub type SequenceEdit = Edit<Sequence, SequencePatch>;

fn keys<T: Keyed>(items: &[T]) -> Vec<String> {
    items.iter().map(|i| i.key().to_string()).collect()
}

/// Diff two keyed lists. The order change is recorded only when the id
/// sequences differ.
fn diff_keyed<T, P>(
    before: &[T],
    after: &[T],
    diff_item: impl Fn(&T, &T) -> Option<P>,
) -> (Vec<Edit<T, P>>, Option<Change<Vec<String>>>)
where
    T: Keyed + Clone,
{
    let after_by_key: HashMap<&str, &T> = after.iter().map(|i| (i.key(), i)).collect();
    let before_keys: BTreeSet<&str> = before.iter().map(|i| i.key()).collect();

    let mut edits = Vec::new();
    for item in before {
        match after_by_key.get(item.key()) {
            None => edits.push(Edit::Removed { item: item.clone() }),
            Some(new) => {
                if let Some(patch) = diff_item(item, new) {
                    edits.push(Edit::Modified { patch });
                }
            }
        }
    }
    for item in after {
        if !before_keys.contains(item.key()) {
            edits.push(Edit::Added { item: item.clone() });
        }
    }

    let order = Change::between(&keys(before), &keys(after));
    (edits, order)
}

fn apply_keyed<T, P>(
    items: &mut Vec<T>,
    edits: &[Edit<T, P>],
    order: &Option<Change<Vec<String>>>,
    scope: &str,
) -> Result<(), DeltaError>
where
    T: Keyed + Clone + PartialEq + fmt::Debug,
    P: ItemPatch<T>,
{
    if let Some(order) = order {
        if keys(items) != order.old {
            return Err(malformed(format!(
                "{scope}: expected order {:?}, found {:?}",
                order.old,
                keys(items)
            )));
        }
    }

    for edit in edits {
        match edit {
            Edit::Removed { item } => {
                let pos = position(items, item.key())
                    .ok_or_else(|| malformed(format!("{scope}: cannot remove missing '{}'", item.key())))?;
                if items[pos] != *item {
                    return Err(malformed(format!(
                        "{scope}: removed '{}' does not match the recorded copy",
                        item.key()
                    )));
                }
                items.remove(pos);
            }
            Edit::Added { item } => {
                if position(items, item.key()).is_some() {
                    return Err(malformed(format!("{scope}: '{}' already present", item.key())));
                }
                items.push(item.clone());
            }
            Edit::Modified { patch } => {
                let pos = position(items, patch.key())
                    .ok_or_else(|| malformed(format!("{scope}: cannot patch missing '{}'", patch.key())))?;
                patch.apply_to(&mut items[pos])?;
            }
        }
    }

    if let Some(order) = order {
        arrange(items, &order.new, scope)?;
    }
    Ok(())
}

fn position<T: Keyed>(items: &[T], key: &str) -> Option<usize> {
    items.iter().position(|i| i.key() == key)
}

/// Reorder `items` to follow `order`, which must name exactly the present ids.
fn arrange<T: Keyed>(items: &mut Vec<T>, order: &[String], scope: &str) -> Result<(), DeltaError> {
    if items.len() != order.len() {
        return Err(malformed(format!(
            "{scope}: order names {} items, found {}",
            order.len(),
            items.len()
        )));
    }
    let mut pool: HashMap<String, T> = items
        .drain(..)
        .map(|item| (item.key().to_string(), item))
        .collect();
    for key in order {
        let item = pool
            .remove(key)
            .ok_or_else(|| malformed(format!("{scope}: order names unknown '{key}'")))?;
        items.push(item);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Field changes to a sequence that keeps its id and isolate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SequencePatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Change<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolate_id: Option<Change<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Change<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Change<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<Change<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Change<String>>,
}

impl SequencePatch {
    fn between(before: &Sequence, after: &Sequence) -> Option<Self> {
        let patch = SequencePatch {
            id: before.id.clone(),
            entity_id: Change::between(&before.entity_id, &after.entity_id),
            isolate_id: Change::between(&before.isolate_id, &after.isolate_id),
            definition: Change::between(&before.definition, &after.definition),
            host: Change::between(&before.host, &after.host),
            segment: Change::between(&before.segment, &after.segment),
            sequence: Change::between(&before.sequence, &after.sequence),
        };
        (!patch.is_empty()).then_some(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.entity_id.is_none()
            && self.isolate_id.is_none()
            && self.definition.is_none()
            && self.host.is_none()
            && self.segment.is_none()
            && self.sequence.is_none()
    }
}

impl ItemPatch<Sequence> for SequencePatch {
    fn key(&self) -> &str {
        &self.id
    }

    fn apply_to(&self, seq: &mut Sequence) -> Result<(), DeltaError> {
        let scope = format!("sequence '{}'", self.id);
        apply_opt(&self.entity_id, &mut seq.entity_id, &format!("{scope} entity_id"))?;
        apply_opt(&self.isolate_id, &mut seq.isolate_id, &format!("{scope} isolate_id"))?;
        apply_opt(&self.definition, &mut seq.definition, &format!("{scope} definition"))?;
        apply_opt(&self.host, &mut seq.host, &format!("{scope} host"))?;
        apply_opt(&self.segment, &mut seq.segment, &format!("{scope} segment"))?;
        apply_opt(&self.sequence, &mut seq.sequence, &format!("{scope} sequence"))
    }

    fn inverted(&self) -> Self {
        SequencePatch {
            id: self.id.clone(),
            entity_id: invert_opt(&self.entity_id),
            isolate_id: invert_opt(&self.isolate_id),
            definition: invert_opt(&self.definition),
            host: invert_opt(&self.host),
            segment: invert_opt(&self.segment),
            sequence: invert_opt(&self.sequence),
        }
    }
}

/// Changes inside an isolate that keeps its id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IsolatePatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<Change<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<Change<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Change<bool>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sequences: Vec<SequenceEdit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_order: Option<Change<Vec<String>>>,
}

impl IsolatePatch {
    fn between(before: &Isolate, after: &Isolate) -> Option<Self> {
        let (sequences, sequence_order) =
            diff_keyed(&before.sequences, &after.sequences, SequencePatch::between);
        let patch = IsolatePatch {
            id: before.id.clone(),
            source_type: Change::between(&before.source_type, &after.source_type),
            source_name: Change::between(&before.source_name, &after.source_name),
            default: Change::between(&before.default, &after.default),
            sequences,
            sequence_order,
        };
        (!patch.is_empty()).then_some(patch)
    }

    pub fn is_empty(&self) -> bool {
        self.source_type.is_none()
            && self.source_name.is_none()
            && self.default.is_none()
            && self.sequences.is_empty()
            && self.sequence_order.is_none()
    }
}

impl ItemPatch<Isolate> for IsolatePatch {
    fn key(&self) -> &str {
        &self.id
    }

    fn apply_to(&self, isolate: &mut Isolate) -> Result<(), DeltaError> {
        let scope = format!("isolate '{}'", self.id);
        apply_opt(&self.source_type, &mut isolate.source_type, &format!("{scope} source_type"))?;
        apply_opt(&self.source_name, &mut isolate.source_name, &format!("{scope} source_name"))?;
        apply_opt(&self.default, &mut isolate.default, &format!("{scope} default"))?;
        apply_keyed(
            &mut isolate.sequences,
            &self.sequences,
            &self.sequence_order,
            &format!("{scope} sequences"),
        )
    }

    fn inverted(&self) -> Self {
        IsolatePatch {
            id: self.id.clone(),
            source_type: invert_opt(&self.source_type),
            source_name: invert_opt(&self.source_name),
            default: invert_opt(&self.default),
            sequences: self.sequences.iter().map(Edit::inverted).collect(),
            sequence_order: invert_opt(&self.sequence_order),
        }
    }
}

/// A change to one free-form field. Presence is explicit, so a field set to
/// JSON `null` is told apart from a field that is absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldChange {
    Added { value: Value },
    Removed { value: Value },
    Modified { old: Value, new: Value },
}

impl FieldChange {
    fn between(before: Option<&Value>, after: Option<&Value>) -> Option<Self> {
        match (before, after) {
            (None, Some(value)) => Some(FieldChange::Added { value: value.clone() }),
            (Some(value), None) => Some(FieldChange::Removed { value: value.clone() }),
            (Some(old), Some(new)) if old != new => Some(FieldChange::Modified {
                old: old.clone(),
                new: new.clone(),
            }),
            _ => None,
        }
    }

    pub fn inverted(&self) -> Self {
        match self {
            FieldChange::Added { value } => FieldChange::Removed { value: value.clone() },
            FieldChange::Removed { value } => FieldChange::Added { value: value.clone() },
            FieldChange::Modified { old, new } => FieldChange::Modified {
                old: new.clone(),
                new: old.clone(),
            },
        }
    }

    fn apply_to(&self, fields: &mut BTreeMap<String, Value>, key: &str) -> Result<(), DeltaError> {
        let expected = match self {
            FieldChange::Added { .. } => None,
            FieldChange::Removed { value } | FieldChange::Modified { old: value, .. } => Some(value),
        };
        let found = fields.get(key);
        if found != expected {
            return Err(malformed(format!(
                "field '{key}': expected {}, found {}",
                describe(expected),
                describe(found)
            )));
        }

        match self {
            FieldChange::Added { value } | FieldChange::Modified { new: value, .. } => {
                fields.insert(key.to_string(), value.clone());
            }
            FieldChange::Removed { .. } => {
                fields.remove(key);
            }
        }
        Ok(())
    }
}

fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "nothing".to_string(), Value::to_string)
}

/// Changes to an entity that exists on both sides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Change<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Change<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<Change<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub isolates: Vec<IsolateEdit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolate_order: Option<Change<Vec<String>>>,
}

impl EntityPatch {
    fn between(before: &Entity, after: &Entity) -> Self {
        let field_keys: BTreeSet<&String> = before.fields.keys().chain(after.fields.keys()).collect();
        let fields = field_keys
            .into_iter()
            .filter_map(|key| {
                FieldChange::between(before.fields.get(key.as_str()), after.fields.get(key.as_str()))
                    .map(|change| (key.clone(), change))
            })
            .collect();

        let (isolates, isolate_order) =
            diff_keyed(&before.isolates, &after.isolates, IsolatePatch::between);

        EntityPatch {
            id: before.id.clone(),
            version: Change::between(&before.version, &after.version),
            name: Change::between(&before.name, &after.name),
            abbreviation: Change::between(&before.abbreviation, &after.abbreviation),
            fields,
            isolates,
            isolate_order,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.name.is_none()
            && self.abbreviation.is_none()
            && self.fields.is_empty()
            && self.isolates.is_empty()
            && self.isolate_order.is_none()
    }

    fn apply_to(&self, entity: &mut Entity) -> Result<(), DeltaError> {
        if entity.id != self.id {
            return Err(malformed(format!(
                "patch for entity '{}' applied to '{}'",
                self.id, entity.id
            )));
        }
        apply_opt(&self.version, &mut entity.version, "version")?;
        apply_opt(&self.name, &mut entity.name, "name")?;
        apply_opt(&self.abbreviation, &mut entity.abbreviation, "abbreviation")?;

        for (key, change) in &self.fields {
            change.apply_to(&mut entity.fields, key)?;
        }

        apply_keyed(&mut entity.isolates, &self.isolates, &self.isolate_order, "isolates")
    }

    fn inverted(&self) -> Self {
        EntityPatch {
            id: self.id.clone(),
            version: invert_opt(&self.version),
            name: invert_opt(&self.name),
            abbreviation: invert_opt(&self.abbreviation),
            fields: self
                .fields
                .iter()
                .map(|(k, c)| (k.clone(), c.inverted()))
                .collect(),
            isolates: self.isolates.iter().map(Edit::inverted).collect(),
            isolate_order: invert_opt(&self.isolate_order),
        }
    }
}

// ---------------------------------------------------------------------------
// Delta
// ---------------------------------------------------------------------------

/// The recorded difference between two versions of one entity.
///
/// `Create` and `Remove` carry the full snapshot on the existing side, which
/// is what lets a history walk step back across a creation or a deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delta {
    Create { entity: Entity },
    Update { patch: EntityPatch },
    Remove { entity: Entity },
}

impl Delta {
    pub fn entity_id(&self) -> &str {
        match self {
            Delta::Create { entity } | Delta::Remove { entity } => &entity.id,
            Delta::Update { patch } => &patch.id,
        }
    }

    /// True for an update that changes nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, Delta::Update { patch } if patch.is_empty())
    }

    /// The delta that undoes this one.
    pub fn inverted(&self) -> Delta {
        match self {
            Delta::Create { entity } => Delta::Remove {
                entity: entity.clone(),
            },
            Delta::Remove { entity } => Delta::Create {
                entity: entity.clone(),
            },
            Delta::Update { patch } => Delta::Update {
                patch: patch.inverted(),
            },
        }
    }

    pub fn summary(&self) -> DeltaSummary {
        let mut summary = DeltaSummary::default();
        match self {
            Delta::Create { entity } | Delta::Remove { entity } => {
                summary.isolates_added = entity.isolates.len();
                summary.sequences_added = entity.sequence_count();
            }
            Delta::Update { patch } => {
                summary.fields_changed = [
                    patch.version.is_some(),
                    patch.name.is_some(),
                    patch.abbreviation.is_some(),
                ]
                .iter()
                .filter(|changed| **changed)
                .count()
                    + patch.fields.len();
                for edit in &patch.isolates {
                    match edit {
                        Edit::Added { item } => {
                            summary.isolates_added += 1;
                            summary.sequences_added += item.sequences.len();
                        }
                        Edit::Removed { item } => {
                            summary.isolates_removed += 1;
                            summary.sequences_removed += item.sequences.len();
                        }
                        Edit::Modified { patch } => {
                            summary.isolates_modified += 1;
                            for seq_edit in &patch.sequences {
                                match seq_edit {
                                    Edit::Added { .. } => summary.sequences_added += 1,
                                    Edit::Removed { .. } => summary.sequences_removed += 1,
                                    Edit::Modified { .. } => summary.sequences_modified += 1,
                                }
                            }
                        }
                    }
                }
            }
        }
        if let Delta::Remove { .. } = self {
            std::mem::swap(&mut summary.isolates_added, &mut summary.isolates_removed);
            std::mem::swap(&mut summary.sequences_added, &mut summary.sequences_removed);
        }
        summary
    }
}

/// Counts of what a delta touches, for logs and listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSummary {
    pub fields_changed: usize,
    pub isolates_added: usize,
    pub isolates_removed: usize,
    pub isolates_modified: usize,
    pub sequences_added: usize,
    pub sequences_removed: usize,
    pub sequences_modified: usize,
}

impl fmt::Display for DeltaSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fields, isolates +{}/-{}/~{}, sequences +{}/-{}/~{}",
            self.fields_changed,
            self.isolates_added,
            self.isolates_removed,
            self.isolates_modified,
            self.sequences_added,
            self.sequences_removed,
            self.sequences_modified
        )
    }
}

/// Compute the delta that turns `before` into `after`.
///
/// Returns `Err(DeltaError::Incomparable)` when both are `None`, and a
/// malformed error when the snapshots are of different entities.
pub fn diff(before: Option<&Entity>, after: Option<&Entity>) -> Result<Delta, DeltaError> {
    match (before, after) {
        (None, Some(after)) => Ok(Delta::Create {
            entity: after.clone(),
        }),
        (Some(before), None) => Ok(Delta::Remove {
            entity: before.clone(),
        }),
        (Some(before), Some(after)) => {
            if before.id != after.id {
                return Err(malformed(format!(
                    "cannot diff entity '{}' against '{}'",
                    before.id, after.id
                )));
            }
            Ok(Delta::Update {
                patch: EntityPatch::between(before, after),
            })
        }
        (None, None) => Err(DeltaError::Incomparable),
    }
}

/// Apply `delta` to move `snapshot` one version forward.
///
/// The input is not modified; a new snapshot is returned. `None` stands for
/// "entity does not exist".
pub fn apply_forward(snapshot: Option<&Entity>, delta: &Delta) -> Result<Option<Entity>, DeltaError> {
    match delta {
        Delta::Create { entity } => match snapshot {
            None => Ok(Some(entity.clone())),
            Some(existing) => Err(malformed(format!(
                "cannot create entity '{}': '{}' already exists",
                entity.id, existing.id
            ))),
        },
        Delta::Remove { entity } => match snapshot {
            Some(existing) if existing == entity => Ok(None),
            Some(existing) => Err(malformed(format!(
                "cannot remove entity '{}': snapshot at version {} does not match the recorded copy at version {}",
                entity.id, existing.version, entity.version
            ))),
            None => Err(malformed(format!(
                "cannot remove entity '{}': it does not exist",
                entity.id
            ))),
        },
        Delta::Update { patch } => {
            let base = snapshot.ok_or_else(|| {
                malformed(format!("cannot patch entity '{}': it does not exist", patch.id))
            })?;
            let mut next = base.clone();
            patch.apply_to(&mut next)?;
            Ok(Some(next))
        }
    }
}

/// Apply `delta` in reverse to move `snapshot` one version back.
pub fn apply_backward(snapshot: Option<&Entity>, delta: &Delta) -> Result<Option<Entity>, DeltaError> {
    apply_forward(snapshot, &delta.inverted())
}
