//! Per-type resource policy
//!
//! A [`ResourceSchema`] tells the engine which properties a type requires,
//! which ones cannot change in place (a change forces a replace), and whether
//! the type is a lookup of something the stack does not own.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::resource::ResourceNode;

/// Policy for one resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub required: BTreeSet<String>,
    pub immutable: BTreeSet<String>,
    /// Lookup-only: read, never replaced, deleted without a provider call
    pub data_source: bool,
    /// Provider operations for this type usually answer `Pending`
    pub long_running: bool,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            required: BTreeSet::new(),
            immutable: BTreeSet::new(),
            data_source: false,
            long_running: false,
        }
    }

    pub fn required<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn immutable<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immutable.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn data_source(mut self) -> Self {
        self.data_source = true;
        self
    }

    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    pub fn is_immutable(&self, key: &str) -> bool {
        self.immutable.contains(key)
    }
}

/// Set of known resource types
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    schemas: HashMap<String, ResourceSchema>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, replacing any previous one for the same type
    pub fn register(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.resource_type.clone(), schema);
    }

    pub fn with(mut self, schema: ResourceSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    pub fn is_data_source(&self, resource_type: &str) -> bool {
        self.get(resource_type).is_some_and(|s| s.data_source)
    }

    pub fn is_immutable(&self, resource_type: &str, key: &str) -> bool {
        self.get(resource_type).is_some_and(|s| s.is_immutable(key))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Check a node against its type's schema
    pub fn validate(&self, node: &ResourceNode) -> Result<()> {
        if node.name().trim().is_empty() {
            return Err(Error::validation(node.id(), "name must not be empty"));
        }

        let schema = self.get(node.resource_type()).ok_or_else(|| {
            Error::validation(
                node.id(),
                format!("unknown resource type `{}`", node.resource_type()),
            )
        })?;

        let missing: Vec<&str> = schema
            .required
            .iter()
            .filter(|key| {
                node.properties()
                    .get(key.as_str())
                    .is_none_or(crate::resource::PropertyValue::is_null)
            })
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            return Err(Error::validation(
                node.id(),
                format!("missing required properties: {}", missing.join(", ")),
            ));
        }

        Ok(())
    }
}
