//! Property-level diffs and change set statistics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::planner::{Change, ChangeSet};
use crate::resource::{PropertyBag, PropertyValue};
use crate::types::Action;

/// Difference of a single property between the applied and desired definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDiff {
    pub key: String,
    /// Value recorded in state, `None` if the property is new
    pub before: Option<PropertyValue>,
    /// Desired value, `None` if the property was dropped
    pub after: Option<PropertyValue>,
}

impl PropertyDiff {
    /// Check if this diff represents an addition
    pub fn is_addition(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    /// Check if this diff represents a removal
    pub fn is_removal(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }
}

/// Compare two property bags key by key
///
/// Returns only keys whose value differs, in key order.
pub fn diff_properties(before: &PropertyBag, after: &PropertyBag) -> Vec<PropertyDiff> {
    let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let old = before.get(key);
            let new = after.get(key);
            (old != new).then(|| PropertyDiff {
                key: key.clone(),
                before: old.cloned(),
                after: new.cloned(),
            })
        })
        .collect()
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub deletes: usize,
}

impl DiffSummary {
    /// Create a summary from a change set
    pub fn from_changes(changes: &ChangeSet) -> Self {
        let mut summary = Self::default();
        for change in changes.iter() {
            match change.action {
                Action::Create => summary.creates += 1,
                Action::Update => summary.updates += 1,
                Action::Replace => summary.replaces += 1,
                Action::Delete => summary.deletes += 1,
            }
        }
        summary
    }
}

/// Group changes by resource type
pub fn group_by_type(changes: &ChangeSet) -> BTreeMap<&str, Vec<&Change>> {
    let mut groups: BTreeMap<&str, Vec<&Change>> = BTreeMap::new();
    for change in changes.iter() {
        groups
            .entry(change.id.resource_type.as_str())
            .or_default()
            .push(change);
    }
    groups
}
