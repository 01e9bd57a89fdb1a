// SPDX-License-Identifier: PMPL-1.0-or-later
//! Version tags and change identifiers.
//!
//! Every history record is keyed by `"{entity_id}.{version}"`, where the
//! version is the number the change produced or the literal `removed` when
//! the change deleted the entity.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const REMOVED: &str = "removed";

/// The version a change produced: a number, or the removal sentinel.
///
/// Numbers order naturally and `Removed` orders after every number, matching
/// the position of a deletion at the end of an entity's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionTag {
    Number(u64),
    Removed,
}

impl VersionTag {
    pub fn number(self) -> Option<u64> {
        match self {
            VersionTag::Number(n) => Some(n),
            VersionTag::Removed => None,
        }
    }

    pub fn is_removed(self) -> bool {
        matches!(self, VersionTag::Removed)
    }
}

impl Ord for VersionTag {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (VersionTag::Number(a), VersionTag::Number(b)) => a.cmp(b),
            (VersionTag::Number(_), VersionTag::Removed) => Ordering::Less,
            (VersionTag::Removed, VersionTag::Number(_)) => Ordering::Greater,
            (VersionTag::Removed, VersionTag::Removed) => Ordering::Equal,
        }
    }
}

impl PartialOrd for VersionTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u64> for VersionTag {
    fn from(n: u64) -> Self {
        VersionTag::Number(n)
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionTag::Number(n) => write!(f, "{}", n),
            VersionTag::Removed => f.write_str(REMOVED),
        }
    }
}

impl FromStr for VersionTag {
    type Err = ChangeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == REMOVED {
            return Ok(VersionTag::Removed);
        }
        s.parse::<u64>()
            .map(VersionTag::Number)
            .map_err(|_| ChangeIdError::InvalidVersion(s.to_string()))
    }
}

// Stored as a plain integer, or the string "removed".
impl Serialize for VersionTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VersionTag::Number(n) => serializer.serialize_u64(*n),
            VersionTag::Removed => serializer.serialize_str(REMOVED),
        }
    }
}

impl<'de> Deserialize<'de> for VersionTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TagVisitor;

        impl Visitor<'_> for TagVisitor {
            type Value = VersionTag;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or \"removed\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<VersionTag, E> {
                Ok(VersionTag::Number(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<VersionTag, E> {
                u64::try_from(v)
                    .map(VersionTag::Number)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<VersionTag, E> {
                if v == REMOVED {
                    Ok(VersionTag::Removed)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(TagVisitor)
    }
}

/// Errors parsing a change id or version tag.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChangeIdError {
    #[error("change id '{0}' is not of the form '<entity_id>.<version>'")]
    MissingSeparator(String),

    #[error("invalid version '{0}': expected an integer or 'removed'")]
    InvalidVersion(String),

    #[error("invalid entity id '{0}': must be non-empty and must not contain '.'")]
    InvalidEntityId(String),
}

/// Composite key of a history record: `"{entity_id}.{version}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeId {
    entity_id: String,
    version: VersionTag,
}

impl ChangeId {
    pub fn new(entity_id: impl Into<String>, version: VersionTag) -> Result<Self, ChangeIdError> {
        let entity_id = entity_id.into();
        validate_entity_id(&entity_id)?;
        Ok(Self { entity_id, version })
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn version(&self) -> VersionTag {
        self.version
    }
}

/// Entity ids become the first half of a change id, so they cannot contain
/// the separator.
pub fn validate_entity_id(entity_id: &str) -> Result<(), ChangeIdError> {
    if entity_id.is_empty() || entity_id.contains('.') {
        return Err(ChangeIdError::InvalidEntityId(entity_id.to_string()));
    }
    Ok(())
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity_id, self.version)
    }
}

impl FromStr for ChangeId {
    type Err = ChangeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (entity_id, version) = s
            .split_once('.')
            .ok_or_else(|| ChangeIdError::MissingSeparator(s.to_string()))?;
        ChangeId::new(entity_id, version.parse()?)
    }
}

impl Serialize for ChangeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChangeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
