//! Resource model for declarative state management
//!
//! A [`ResourceNode`] is one managed cloud object: its identity, the desired
//! property bag, and the outputs the provider assigned once it was applied.
//! Property values may hold [`Reference`]s to another node's outputs; those
//! stay unresolved in the graph and are only resolved by the executor once
//! the target node has been applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::types::{NodeStatus, Outputs, ResourceId};

/// Desired properties of a node, keyed by property name
pub type PropertyBag = BTreeMap<String, PropertyValue>;

/// Pointer from one node's input to a field of another node's outputs
///
/// `output` is a dotted path; numeric segments index into arrays
/// (`domain_validation_options.0.resource_record_name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub target: ResourceId,
    pub output: String,
}

impl Reference {
    pub fn new(target: &ResourceId, output: impl Into<String>) -> Self {
        Self {
            target: target.clone(),
            output: output.into(),
        }
    }

    /// Look the referenced field up in the target's outputs
    pub fn lookup<'a>(&self, outputs: &'a Outputs) -> Option<&'a Value> {
        let mut segments = self.output.split('.');
        let first = segments.next()?;
        let mut current = outputs.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Piece of a format string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

/// A desired property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Literal(Value),
    Ref(Reference),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    /// String interpolation of literal text and referenced values
    Format(Vec<Segment>),
}

/// A reference could not be resolved against its target's outputs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("output `{output}` of {target} is not available")]
pub struct UnresolvedReference {
    pub target: ResourceId,
    pub output: String,
}

impl PropertyValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(target: &ResourceId, output: impl Into<String>) -> Self {
        Self::Ref(Reference::new(target, output))
    }

    pub fn list(items: impl IntoIterator<Item = PropertyValue>) -> Self {
        Self::List(items.into_iter().collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, PropertyValue)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn format(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self::Format(segments.into_iter().collect())
    }

    /// Whether the value is absent for validation purposes
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Literal(Value::Null))
    }

    /// Call `visit` for every reference inside this value
    pub fn visit_references<'a>(&'a self, visit: &mut impl FnMut(&'a Reference)) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(reference) => visit(reference),
            Self::List(items) => items.iter().for_each(|item| item.visit_references(visit)),
            Self::Map(entries) => entries
                .values()
                .for_each(|value| value.visit_references(visit)),
            Self::Format(segments) => {
                for segment in segments {
                    if let Segment::Ref(reference) = segment {
                        visit(reference);
                    }
                }
            }
        }
    }

    /// Whether any reference inside this value points at `target`
    pub fn references_target(&self, target: &ResourceId) -> bool {
        let mut found = false;
        self.visit_references(&mut |reference| found |= &reference.target == target);
        found
    }

    /// Replace every reference with the value `lookup` returns for it
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value, UnresolvedReference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Ref(reference) => lookup(reference).ok_or_else(|| UnresolvedReference {
                target: reference.target.clone(),
                output: reference.output.clone(),
            }),
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(entries) => entries
                .iter()
                .map(|(key, value)| Ok((key.clone(), value.resolve(lookup)?)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
            Self::Format(segments) => {
                let mut text = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(literal) => text.push_str(literal),
                        Segment::Ref(reference) => {
                            match Self::Ref(reference.clone()).resolve(lookup)? {
                                Value::String(s) => text.push_str(&s),
                                other => text.push_str(&other.to_string()),
                            }
                        }
                    }
                }
                Ok(Value::String(text))
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Literal(Value::from(value))
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<Reference> for PropertyValue {
    fn from(reference: Reference) -> Self {
        Self::Ref(reference)
    }
}

/// Build a property bag from `(key, value)` pairs
pub fn properties<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> PropertyBag
where
    K: Into<String>,
    V: Into<PropertyValue>,
{
    entries
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// One managed cloud object inside a graph
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    id: ResourceId,
    properties: PropertyBag,
    depends_on: BTreeSet<ResourceId>,
    protect: bool,
    outputs: Option<Outputs>,
    status: NodeStatus,
}

impl ResourceNode {
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        properties: PropertyBag,
    ) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            properties,
            depends_on: BTreeSet::new(),
            protect: false,
            outputs: None,
            status: NodeStatus::Pending,
        }
    }

    /// Add an ordering-only dependency (no value flows between the nodes)
    pub fn depends_on(mut self, id: &ResourceId) -> Self {
        self.depends_on.insert(id.clone());
        self
    }

    /// Refuse plans that would delete or replace this node
    pub fn protected(mut self) -> Self {
        self.protect = true;
        self
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn resource_type(&self) -> &str {
        &self.id.resource_type
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn is_protected(&self) -> bool {
        self.protect
    }

    pub fn outputs(&self) -> Option<&Outputs> {
        self.outputs.as_ref()
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
    }

    pub(crate) fn set_outputs(&mut self, outputs: Option<Outputs>) {
        self.outputs = outputs;
    }

    /// Every reference in the property bag
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        for value in self.properties.values() {
            value.visit_references(&mut |reference| found.push(reference));
        }
        found
    }

    /// Nodes this one depends on: reference targets plus explicit dependencies
    pub fn dependency_ids(&self) -> BTreeSet<ResourceId> {
        self.references()
            .into_iter()
            .map(|reference| reference.target.clone())
            .chain(self.depends_on.iter().cloned())
            .collect()
    }

    /// Top-level property keys whose value references `target`
    pub fn keys_referencing(&self, target: &ResourceId) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(_, value)| value.references_target(target))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Resolve the property bag into concrete inputs
    pub fn resolve_inputs<F>(&self, lookup: &F) -> Result<Outputs, UnresolvedReference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        self.properties
            .iter()
            .map(|(key, value)| Ok((key.clone(), value.resolve(lookup)?)))
            .collect()
    }

    /// Checksum of the declared definition (properties, explicit dependencies, protection)
    pub fn definition_checksum(&self) -> String {
        definition_checksum(&self.properties, &self.depends_on, self.protect)
    }
}

/// blake3 over the canonical JSON form of a definition
pub(crate) fn definition_checksum(
    properties: &PropertyBag,
    depends_on: &BTreeSet<ResourceId>,
    protect: bool,
) -> String {
    #[derive(Serialize)]
    struct Definition<'a> {
        properties: &'a PropertyBag,
        depends_on: &'a BTreeSet<ResourceId>,
        protect: bool,
    }

    let definition = Definition {
        properties,
        depends_on,
        protect,
    };
    // Serializing string-keyed maps of JSON values cannot fail
    let bytes = serde_json::to_vec(&definition).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}
