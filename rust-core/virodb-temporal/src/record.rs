// SPDX-License-Identifier: PMPL-1.0-or-later
//! History records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use virodb_document::{ChangeId, VersionTag};

use crate::diff::Delta;
use crate::TemporalError;

/// The kind of edit that produced a record. Descriptive only; the delta is
/// what history walks act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMethod {
    Create,
    Edit,
    Remove,
    Revert,
    AddIsolate,
    EditIsolate,
    RemoveIsolate,
    SetAsDefault,
    AddSequence,
    EditSequence,
    RemoveSequence,
}

impl fmt::Display for ChangeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeMethod::Create => "create",
            ChangeMethod::Edit => "edit",
            ChangeMethod::Remove => "remove",
            ChangeMethod::Revert => "revert",
            ChangeMethod::AddIsolate => "add_isolate",
            ChangeMethod::EditIsolate => "edit_isolate",
            ChangeMethod::RemoveIsolate => "remove_isolate",
            ChangeMethod::SetAsDefault => "set_as_default",
            ChangeMethod::AddSequence => "add_sequence",
            ChangeMethod::EditSequence => "edit_sequence",
            ChangeMethod::RemoveSequence => "remove_sequence",
        };
        f.write_str(name)
    }
}

/// One immutable entry of an entity's history.
///
/// `from_version` is `None` only for the record that created the entity.
/// A removal record has `to_version = Removed` and keeps the last live
/// version in `from_version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub id: ChangeId,
    pub entity_id: String,
    pub entity_name: String,
    pub from_version: Option<u64>,
    pub to_version: VersionTag,
    pub method: ChangeMethod,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub diff: Delta,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    /// Build a record for `diff`, checking that the version step is one the
    /// log can hold: creation lands on `0`, an edit advances by exactly one,
    /// and a removal leaves a numbered version.
    pub fn new(
        entity_name: impl Into<String>,
        from_version: Option<u64>,
        to_version: VersionTag,
        method: ChangeMethod,
        diff: Delta,
    ) -> Result<Self, TemporalError> {
        let step_ok = match (&diff, from_version, to_version) {
            (Delta::Create { .. }, None, VersionTag::Number(0)) => true,
            (Delta::Update { .. }, Some(from), VersionTag::Number(to)) => from.checked_add(1) == Some(to),
            (Delta::Remove { .. }, Some(_), VersionTag::Removed) => true,
            _ => false,
        };
        if !step_ok {
            return Err(TemporalError::InvalidVersion(format!(
                "a {} change cannot go from {:?} to {}",
                method, from_version, to_version
            )));
        }

        let entity_id = diff.entity_id().to_string();
        Ok(Self {
            id: ChangeId::new(entity_id.clone(), to_version)?,
            entity_id,
            entity_name: entity_name.into(),
            from_version,
            to_version,
            method,
            description: String::new(),
            user_id: None,
            diff,
            timestamp: Utc::now(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn by_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}
