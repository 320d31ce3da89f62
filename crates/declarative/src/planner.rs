//! Change planner - diffs a desired graph against the last applied state

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::diff::{DiffSummary, diff_properties};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::schema::Catalog;
use crate::state::{StateRecord, StateSnapshot};
use crate::types::{Action, ResourceId};

/// One planned change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub id: ResourceId,
    pub action: Action,
    /// Desired-graph rank, or previous-state rank for deletes
    pub rank: usize,
    /// Top-level property keys that differ (or are affected by a cascade)
    pub changed: Vec<String>,
    /// Why the change was planned when it is not a direct edit
    pub reason: Option<String>,
    /// Record of the currently applied instance
    #[serde(skip)]
    pub prior: Option<StateRecord>,
}

/// Ordered list of changes: deletes first, then creates, updates and replaces
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Change> {
        self.changes.iter().find(|change| &change.id == id)
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_changes(self)
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Pending decision for a desired node
struct Decision {
    action: Action,
    changed: Vec<String>,
    reason: Option<String>,
}

/// Plan the changes that move `previous` to `desired`
pub fn plan(desired: &Graph, previous: &StateSnapshot) -> Result<ChangeSet> {
    let catalog = desired.catalog();
    let mut decisions: BTreeMap<ResourceId, Decision> = BTreeMap::new();

    for node in desired.nodes() {
        let Some(record) = previous.get(node.id()) else {
            decisions.insert(
                node.id().clone(),
                Decision {
                    action: Action::Create,
                    changed: node.properties().keys().cloned().collect(),
                    reason: None,
                },
            );
            continue;
        };

        if record.checksum == node.definition_checksum() {
            continue;
        }

        let changed: Vec<String> = diff_properties(&record.properties, node.properties())
            .into_iter()
            .map(|d| d.key)
            .collect();
        let immutable: Vec<&str> = changed
            .iter()
            .filter(|key| catalog.is_immutable(node.resource_type(), key))
            .map(String::as_str)
            .collect();

        let action = if immutable.is_empty() || catalog.is_data_source(node.resource_type()) {
            Action::Update
        } else {
            if node.is_protected() {
                return Err(Error::plan(
                    node.id(),
                    format!(
                        "changing {} requires replacement but the resource is protected",
                        immutable.join(", ")
                    ),
                ));
            }
            Action::Replace
        };

        let reason = changed
            .is_empty()
            .then(|| "depends_on or protect changed".to_string());
        decisions.insert(
            node.id().clone(),
            Decision {
                action,
                changed,
                reason,
            },
        );
    }

    cascade_replacements(desired, previous, &mut decisions)?;

    let mut changes = plan_deletes(desired, previous)?;

    let mut upserts: Vec<Change> = decisions
        .into_iter()
        .map(|(id, decision)| Change {
            rank: desired.rank(&id).unwrap_or(0),
            prior: previous.get(&id).cloned(),
            id,
            action: decision.action,
            changed: decision.changed,
            reason: decision.reason,
        })
        .collect();
    upserts.sort_by(|a, b| (a.rank, &a.id).cmp(&(b.rank, &b.id)));
    changes.extend(upserts);

    log::debug!("planned {} changes", changes.len());
    Ok(ChangeSet { changes })
}

/// Plan a teardown of everything tracked in `previous`
pub fn plan_destroy(previous: &StateSnapshot, catalog: Arc<Catalog>) -> Result<ChangeSet> {
    plan(&Graph::empty(catalog), previous)
}

/// Propagate replacements to dependents that hold a reference to a replaced node
fn cascade_replacements(
    desired: &Graph,
    previous: &StateSnapshot,
    decisions: &mut BTreeMap<ResourceId, Decision>,
) -> Result<()> {
    let catalog = desired.catalog();
    let mut queue: VecDeque<ResourceId> = decisions
        .iter()
        .filter(|(_, d)| d.action == Action::Replace)
        .map(|(id, _)| id.clone())
        .collect();

    while let Some(replaced) = queue.pop_front() {
        for dependent_id in desired.dependents(&replaced) {
            let Some(dependent) = desired.node(&dependent_id) else {
                continue;
            };
            if !previous.contains(&dependent_id) {
                continue;
            }

            let keys: Vec<String> = dependent
                .keys_referencing(&replaced)
                .into_iter()
                .map(str::to_string)
                .collect();
            if keys.is_empty() {
                // depends_on only: ordering, no value flows
                continue;
            }

            let forces_replace = !catalog.is_data_source(dependent.resource_type())
                && keys
                    .iter()
                    .any(|key| catalog.is_immutable(dependent.resource_type(), key));

            let current = decisions.get(&dependent_id).map(|d| d.action);
            if forces_replace {
                if current == Some(Action::Replace) {
                    continue;
                }
                if dependent.is_protected() {
                    return Err(Error::plan(
                        &dependent_id,
                        format!(
                            "replacing {replaced} would orphan the reference held by this protected resource"
                        ),
                    ));
                }

                let decision = decisions.entry(dependent_id.clone()).or_insert(Decision {
                    action: Action::Replace,
                    changed: Vec::new(),
                    reason: None,
                });
                decision.action = Action::Replace;
                merge_keys(&mut decision.changed, keys);
                decision.reason = Some(format!(
                    "replaced because dependency {replaced} is replaced"
                ));
                queue.push_back(dependent_id);
            } else if current.is_none() {
                decisions.insert(
                    dependent_id,
                    Decision {
                        action: Action::Update,
                        changed: keys,
                        reason: Some(format!("dependency {replaced} is replaced")),
                    },
                );
            }
        }
    }
    Ok(())
}

fn merge_keys(into: &mut Vec<String>, keys: Vec<String>) {
    into.extend(keys);
    into.sort();
    into.dedup();
}

/// Deletes of tracked resources that left the desired graph, dependents first
fn plan_deletes(desired: &Graph, previous: &StateSnapshot) -> Result<Vec<Change>> {
    let ranks = previous.ranks();
    let mut deletes = Vec::new();

    for record in previous.records() {
        if desired.contains(&record.id) {
            continue;
        }
        if record.protect {
            return Err(Error::plan(
                &record.id,
                "resource is protected and cannot be deleted",
            ));
        }
        deletes.push(Change {
            id: record.id.clone(),
            action: Action::Delete,
            rank: ranks.get(&record.id).copied().unwrap_or(0),
            changed: Vec::new(),
            reason: None,
            prior: Some(record.clone()),
        });
    }

    deletes.sort_by(|a, b| (Reverse(a.rank), &a.id).cmp(&(Reverse(b.rank), &b.id)));
    Ok(deletes)
}
