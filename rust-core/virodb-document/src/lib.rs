// SPDX-License-Identifier: PMPL-1.0-or-later
//! ViroDB Documents
//!
//! Typed shapes of the versioned records ViroDB manages.
//!
//! An [`Entity`] (a virus-like taxon record) embeds its [`Isolate`]s, and in
//! its assembled form every isolate embeds its [`Sequence`]s. On disk the
//! sequences live in their own collection: the persisted root is an
//! [`EntityRecord`] whose isolates are [`IsolateRecord`]s without sequence
//! bodies. [`join`] converts between the two forms.

pub mod join;
pub mod version;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use join::{assemble, decompose, JoinError};
pub use version::{validate_entity_id, ChangeId, ChangeIdError, VersionTag};

/// Shape errors in an assembled entity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityError {
    #[error("entity '{entity_id}' has more than one isolate '{isolate_id}'")]
    DuplicateIsolate { entity_id: String, isolate_id: String },

    /// Sequence ids key the live sequence store per entity, so they must be
    /// unique across all isolates.
    #[error("entity '{entity_id}' has more than one sequence '{sequence_id}'")]
    DuplicateSequence { entity_id: String, sequence_id: String },
}

/// A leaf sequence record.
///
/// `entity_id` and `isolate_id` are back-references, not ownership: the
/// sequence collection owns the record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sequence {
    pub id: String,
    pub entity_id: String,
    pub isolate_id: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    /// Raw nucleotide payload.
    pub sequence: String,
}

impl Sequence {
    pub fn new(
        id: impl Into<String>,
        entity_id: impl Into<String>,
        isolate_id: impl Into<String>,
        sequence: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_id: entity_id.into(),
            isolate_id: isolate_id.into(),
            definition: String::new(),
            host: String::new(),
            segment: None,
            sequence: sequence.into(),
        }
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = definition.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

/// An isolate as stored inside the persisted root record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IsolateRecord {
    pub id: String,
    pub source_type: String,
    pub source_name: String,
    #[serde(default)]
    pub default: bool,
}

/// The persisted root of an entity: everything except sequence bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    pub id: String,
    pub version: u64,
    pub name: String,
    #[serde(default)]
    pub abbreviation: String,
    /// Remaining named fields of the record.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub isolates: Vec<IsolateRecord>,
}

/// An isolate of an assembled entity, carrying its sequences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Isolate {
    pub id: String,
    pub source_type: String,
    pub source_name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub sequences: Vec<Sequence>,
}

impl Isolate {
    pub fn new(
        id: impl Into<String>,
        source_type: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_type: source_type.into(),
            source_name: source_name.into(),
            default: false,
            sequences: Vec::new(),
        }
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequences.push(sequence);
        self
    }

    /// Display name in the `"{source_type} {source_name}"` form.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.source_type, self.source_name)
            .trim()
            .to_string()
    }
}

/// A self-contained snapshot of an entity with every sequence nested under
/// its isolate. This is the shape diffs are computed over and the shape
/// history reconstruction produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    pub version: u64,
    pub name: String,
    #[serde(default)]
    pub abbreviation: String,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub isolates: Vec<Isolate>,
}

impl Entity {
    /// A new entity at version 0 with no isolates.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            name: name.into(),
            abbreviation: String::new(),
            fields: BTreeMap::new(),
            isolates: Vec::new(),
        }
    }

    pub fn with_abbreviation(mut self, abbreviation: impl Into<String>) -> Self {
        self.abbreviation = abbreviation.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_isolate(mut self, isolate: Isolate) -> Self {
        self.isolates.push(isolate);
        self
    }

    pub fn isolate(&self, isolate_id: &str) -> Option<&Isolate> {
        self.isolates.iter().find(|i| i.id == isolate_id)
    }

    pub fn isolate_mut(&mut self, isolate_id: &str) -> Option<&mut Isolate> {
        self.isolates.iter_mut().find(|i| i.id == isolate_id)
    }

    /// Find a sequence anywhere in the entity.
    pub fn sequence(&self, sequence_id: &str) -> Option<&Sequence> {
        self.isolates
            .iter()
            .flat_map(|i| i.sequences.iter())
            .find(|s| s.id == sequence_id)
    }

    pub fn sequence_count(&self) -> usize {
        self.isolates.iter().map(|i| i.sequences.len()).sum()
    }

    /// Check that isolate ids are unique and that sequence ids are unique
    /// across the whole entity.
    pub fn validate(&self) -> Result<(), EntityError> {
        let mut isolates = HashSet::new();
        let mut sequences = HashSet::new();
        for isolate in &self.isolates {
            if !isolates.insert(isolate.id.as_str()) {
                return Err(EntityError::DuplicateIsolate {
                    entity_id: self.id.clone(),
                    isolate_id: isolate.id.clone(),
                });
            }
            for sequence in &isolate.sequences {
                if !sequences.insert(sequence.id.as_str()) {
                    return Err(EntityError::DuplicateSequence {
                        entity_id: self.id.clone(),
                        sequence_id: sequence.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Bring the snapshot into the form [`assemble`] produces: sequence
    /// back-references match their position and sequences are ordered by id
    /// within each isolate. Snapshots must be canonical before they are
    /// diffed, otherwise a stored diff will not apply to a re-assembled entity.
    pub fn canonicalize(&mut self) {
        for isolate in &mut self.isolates {
            for sequence in &mut isolate.sequences {
                sequence.entity_id.clone_from(&self.id);
                sequence.isolate_id.clone_from(&isolate.id);
            }
            isolate.sequences.sort_by(|a, b| a.id.cmp(&b.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_lookup_helpers() {
        let entity = Entity::new("foobar", "Foobar virus")
            .with_isolate(
                Isolate::new("baz", "isolate", "Baz")
                    .as_default()
                    .with_sequence(Sequence::new("test_1", "foobar", "baz", "ATAGGGACATA")),
            )
            .with_isolate(Isolate::new("foo", "isolate", "Foo"));

        assert_eq!(entity.isolate("baz").unwrap().display_name(), "isolate Baz");
        assert!(entity.isolate("nope").is_none());
        assert_eq!(entity.sequence("test_1").unwrap().isolate_id, "baz");
        assert_eq!(entity.sequence_count(), 1);
    }

    #[test]
    fn test_canonicalize_matches_assembled_form() {
        let mut entity = Entity::new("foobar", "Foobar virus").with_isolate(
            Isolate::new("baz", "isolate", "Baz")
                .with_sequence(Sequence::new("test_2", "", "", "GG"))
                .with_sequence(Sequence::new("test_1", "", "", "AT")),
        );
        entity.canonicalize();

        let (root, flat) = decompose(entity.clone());
        assert_eq!(assemble(root, flat).unwrap(), entity);
        assert_eq!(entity.isolates[0].sequences[0].id, "test_1");
        assert_eq!(entity.isolates[0].sequences[1].entity_id, "foobar");
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let entity = Entity::new("foobar", "Foobar virus")
            .with_isolate(
                Isolate::new("baz", "isolate", "Baz")
                    .with_sequence(Sequence::new("test_1", "foobar", "baz", "AT")),
            )
            .with_isolate(Isolate::new("foo", "isolate", "Foo"));
        assert_eq!(entity.validate(), Ok(()));

        let mut shared_sequence = entity.clone();
        shared_sequence.isolates[1]
            .sequences
            .push(Sequence::new("test_1", "foobar", "foo", "GG"));
        assert_eq!(
            shared_sequence.validate(),
            Err(EntityError::DuplicateSequence {
                entity_id: "foobar".into(),
                sequence_id: "test_1".into(),
            })
        );

        let twin_isolate = entity.with_isolate(Isolate::new("baz", "isolate", "Baz 2"));
        assert!(matches!(
            twin_isolate.validate(),
            Err(EntityError::DuplicateIsolate { isolate_id, .. }) if isolate_id == "baz"
        ));
    }

    #[test]
    fn test_sequence_serde_skips_empty_segment() {
        let seq = Sequence::new("test_1", "foobar", "baz", "ATAG").with_host("Plant");
        let json = serde_json::to_value(&seq).unwrap();
        assert!(json.get("segment").is_none());
        assert_eq!(json["host"], "Plant");

        let back: Sequence = serde_json::from_value(json).unwrap();
        assert_eq!(back, seq);
    }

    #[test]
    fn test_entity_defaults_when_fields_missing() {
        let entity: Entity =
            serde_json::from_str(r#"{"id": "foobar", "version": 2, "name": "Foobar virus"}"#)
                .unwrap();
        assert_eq!(entity.version, 2);
        assert!(entity.isolates.is_empty());
        assert!(entity.fields.is_empty());
    }
}
