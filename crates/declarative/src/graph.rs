//! Dependency graph of resource nodes
//!
//! [`GraphBuilder`] collects declared nodes in any order, then derives edges
//! from property references and explicit `depends_on` entries. Edges run
//! dependency -> dependent, so "must exist before" reads left to right.
//! [`GraphBuilder::finish`] only returns a [`Graph`] once every reference has
//! a target and the edges form a DAG.

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::resource::{PropertyBag, Reference, ResourceNode};
use crate::schema::Catalog;
use crate::types::{NodeStatus, Outputs, ResourceId};

/// Petgraph view of the node set, indices allocated in lexical id order
#[derive(Debug, Clone, Default)]
struct Edges {
    graph: DiGraph<ResourceId, ()>,
    index: HashMap<ResourceId, NodeIndex>,
}

impl Edges {
    fn neighbors(&self, id: &ResourceId, direction: Direction) -> Vec<ResourceId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<ResourceId> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Accumulates nodes until the graph is validated
#[derive(Debug)]
pub struct GraphBuilder {
    catalog: Arc<Catalog>,
    nodes: BTreeMap<ResourceId, ResourceNode>,
    edges: Option<Edges>,
}

impl GraphBuilder {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            nodes: BTreeMap::new(),
            edges: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register a node
    ///
    /// Fails when the node does not satisfy its type's schema or another node
    /// with the same `(type, name)` was already added.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<ResourceId> {
        self.catalog.validate(&node)?;

        let id = node.id().clone();
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateNode { id: id.to_string() });
        }

        log::trace!("declared {}", id);
        self.nodes.insert(id.clone(), node);
        self.edges = None;
        Ok(id)
    }

    /// Build a node from its parts and register it
    pub fn declare(
        &mut self,
        resource_type: &str,
        name: &str,
        properties: PropertyBag,
    ) -> Result<ResourceId> {
        self.add_node(ResourceNode::new(resource_type, name, properties))
    }

    /// Derive edges from references and explicit dependencies
    pub fn resolve_edges(&mut self) -> Result<()> {
        let mut edges = Edges::default();
        for id in self.nodes.keys() {
            let idx = edges.graph.add_node(id.clone());
            edges.index.insert(id.clone(), idx);
        }

        for (id, node) in &self.nodes {
            for dependency in node.dependency_ids() {
                if &dependency == id {
                    return Err(Error::validation(id, "resource cannot depend on itself"));
                }
                let Some(&from) = edges.index.get(&dependency) else {
                    return Err(Error::validation(
                        id,
                        format!("references undeclared resource {dependency}"),
                    ));
                };
                edges.graph.add_edge(from, edges.index[id], ());
            }
        }

        self.edges = Some(edges);
        Ok(())
    }

    /// Fail with the full cycle path if the edges are not a DAG
    pub fn detect_cycles(&mut self) -> Result<()> {
        if self.edges.is_none() {
            self.resolve_edges()?;
        }
        let Some(edges) = self.edges.as_ref() else {
            return Ok(());
        };

        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        for id in self.nodes.keys() {
            if !visited.contains(id)
                && let Some(path) = find_cycle(edges, id, &mut visited, &mut stack)
            {
                return Err(Error::Cycle {
                    path: path.iter().map(ToString::to_string).collect(),
                });
            }
        }
        Ok(())
    }

    /// Validate edges and acyclicity, compute ranks and hand over the graph
    pub fn finish(mut self) -> Result<Graph> {
        self.resolve_edges()?;
        self.detect_cycles()?;

        let edges = self.edges.take().unwrap_or_default();
        let order = toposort(&edges.graph, None).map_err(|cycle| Error::Cycle {
            path: vec![edges.graph[cycle.node_id()].to_string()],
        })?;

        let mut ranks: HashMap<ResourceId, usize> = HashMap::new();
        for idx in order {
            let rank = edges
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| ranks.get(&edges.graph[dep]))
                .map(|r| r + 1)
                .max()
                .unwrap_or(0);
            ranks.insert(edges.graph[idx].clone(), rank);
        }

        log::debug!("graph validated: {} nodes", self.nodes.len());
        Ok(Graph {
            catalog: self.catalog,
            nodes: self.nodes,
            edges,
            ranks,
        })
    }
}

/// Walk from `id` towards its dependencies; returns the cycle path if one is found
fn find_cycle(
    edges: &Edges,
    id: &ResourceId,
    visited: &mut HashSet<ResourceId>,
    stack: &mut Vec<ResourceId>,
) -> Option<Vec<ResourceId>> {
    visited.insert(id.clone());
    stack.push(id.clone());

    for dependency in edges.neighbors(id, Direction::Incoming) {
        if let Some(pos) = stack.iter().position(|s| s == &dependency) {
            let mut path = stack[pos..].to_vec();
            path.push(dependency);
            return Some(path);
        }
        if !visited.contains(&dependency)
            && let Some(path) = find_cycle(edges, &dependency, visited, stack)
        {
            return Some(path);
        }
    }

    stack.pop();
    None
}

/// Validated desired-state DAG
#[derive(Debug, Clone)]
pub struct Graph {
    catalog: Arc<Catalog>,
    nodes: BTreeMap<ResourceId, ResourceNode>,
    edges: Edges,
    ranks: HashMap<ResourceId, usize>,
}

impl Graph {
    /// Graph with no nodes, used to plan a full teardown
    pub fn empty(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            nodes: BTreeMap::new(),
            edges: Edges::default(),
            ranks: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    /// All nodes in lexical id order
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Direct dependencies of a node, sorted
    pub fn dependencies(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.edges.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a node, sorted
    pub fn dependents(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.edges.neighbors(id, Direction::Outgoing)
    }

    /// Length of the longest dependency chain below the node
    pub fn rank(&self, id: &ResourceId) -> Option<usize> {
        self.ranks.get(id).copied()
    }

    /// Ids sorted by rank, ties broken lexically
    pub fn topological_order(&self) -> Vec<&ResourceId> {
        let mut ids: Vec<&ResourceId> = self.nodes.keys().collect();
        ids.sort_by_key(|id| (self.ranks.get(*id).copied().unwrap_or(0), *id));
        ids
    }

    /// Move a node to a new status, enforcing the lifecycle
    pub fn transition(&mut self, id: &ResourceId, next: NodeStatus) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::validation(id, "not part of the graph"))?;

        let current = node.status();
        if !current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: next,
            });
        }
        node.set_status(next);
        Ok(())
    }

    pub(crate) fn set_outputs(&mut self, id: &ResourceId, outputs: Outputs) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.set_outputs(Some(outputs));
        }
    }

    /// Mark an unchanged node as applied with the outputs recorded in state
    pub fn restore(&mut self, id: &ResourceId, outputs: Outputs) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.set_outputs(Some(outputs));
                node.set_status(NodeStatus::Applied);
                true
            }
            None => false,
        }
    }

    /// Value of a reference, available once its target has been applied
    pub fn lookup(&self, reference: &Reference) -> Option<Value> {
        let target = self.nodes.get(&reference.target)?;
        if target.status() != NodeStatus::Applied {
            return None;
        }
        reference.lookup(target.outputs()?).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{PropertyValue, properties};
    use crate::schema::ResourceSchema;
    use serde_json::json;

    fn catalog() -> Arc<Catalog> {
        Arc::new(
            Catalog::new()
                .with(ResourceSchema::new("vpc"))
                .with(ResourceSchema::new("cluster"))
                .with(ResourceSchema::new("certificate"))
                .with(ResourceSchema::new("record")),
        )
    }

    fn id(resource_type: &str, name: &str) -> ResourceId {
        ResourceId::new(resource_type, name)
    }

    fn refs(target: &ResourceId) -> PropertyBag {
        properties([("target", PropertyValue::reference(target, "id"))])
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let mut builder = GraphBuilder::new(catalog());
        builder
            .declare("cluster", "main", refs(&id("vpc", "main")))
            .unwrap();
        builder.declare("vpc", "main", PropertyBag::new()).unwrap();

        let graph = builder.finish().unwrap();
        assert_eq!(graph.rank(&id("vpc", "main")), Some(0));
        assert_eq!(graph.rank(&id("cluster", "main")), Some(1));
        assert_eq!(graph.dependents(&id("vpc", "main")), vec![id("cluster", "main")]);
        assert_eq!(graph.dependencies(&id("cluster", "main")), vec![id("vpc", "main")]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut builder = GraphBuilder::new(catalog());
        builder.declare("vpc", "main", PropertyBag::new()).unwrap();
        let err = builder.declare("vpc", "main", PropertyBag::new()).unwrap_err();
        assert!(matches!(err, Error::DuplicateNode { .. }));
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let mut builder = GraphBuilder::new(catalog());
        builder
            .declare("cluster", "main", refs(&id("vpc", "missing")))
            .unwrap();
        let err = builder.finish().unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("vpc::missing"));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut builder = GraphBuilder::new(catalog());
        builder
            .declare("vpc", "main", refs(&id("vpc", "main")))
            .unwrap();
        assert!(matches!(
            builder.finish().unwrap_err(),
            Error::Validation { .. }
        ));
    }

    #[test]
    fn test_cycle_reports_full_path() {
        let mut builder = GraphBuilder::new(catalog());
        builder.declare("vpc", "a", refs(&id("vpc", "b"))).unwrap();
        builder.declare("vpc", "b", refs(&id("vpc", "c"))).unwrap();
        builder.declare("vpc", "c", refs(&id("vpc", "a"))).unwrap();

        let err = builder.detect_cycles().unwrap_err();
        assert_eq!(
            err.to_string(),
            "dependency cycle: vpc::a -> vpc::b -> vpc::c -> vpc::a"
        );
    }

    #[test]
    fn test_topological_order_breaks_ties_lexically() {
        let vpc = id("vpc", "main");
        let cert = id("certificate", "app");
        let cluster = id("cluster", "main");
        let record = id("record", "app");

        let mut builder = GraphBuilder::new(catalog());
        builder
            .declare(
                "record",
                "app",
                properties([
                    ("alias", PropertyValue::reference(&cluster, "endpoint")),
                    ("cert", PropertyValue::reference(&cert, "arn")),
                ]),
            )
            .unwrap();
        builder.declare("cluster", "main", refs(&vpc)).unwrap();
        builder.declare("certificate", "app", PropertyBag::new()).unwrap();
        builder.declare("vpc", "main", PropertyBag::new()).unwrap();

        let graph = builder.finish().unwrap();
        let order: Vec<_> = graph.topological_order().into_iter().cloned().collect();
        assert_eq!(order, vec![cert, vpc, cluster, record]);
    }

    #[test]
    fn test_transition_enforces_lifecycle() {
        let mut builder = GraphBuilder::new(catalog());
        let vpc = builder.declare("vpc", "main", PropertyBag::new()).unwrap();
        let mut graph = builder.finish().unwrap();

        assert!(graph.transition(&vpc, NodeStatus::Applied).is_err());
        graph.transition(&vpc, NodeStatus::Applying).unwrap();
        graph.transition(&vpc, NodeStatus::Applied).unwrap();
        assert!(matches!(
            graph.transition(&vpc, NodeStatus::Failed).unwrap_err(),
            Error::InvalidTransition { .. }
        ));
    }

    #[test]
    fn test_lookup_requires_applied_target() {
        let mut builder = GraphBuilder::new(catalog());
        let vpc = builder.declare("vpc", "main", PropertyBag::new()).unwrap();
        let mut graph = builder.finish().unwrap();
        let reference = Reference::new(&vpc, "id");

        assert_eq!(graph.lookup(&reference), None);

        let outputs = json!({ "id": "vpc-1" }).as_object().cloned().unwrap();
        graph.restore(&vpc, outputs);
        assert_eq!(graph.lookup(&reference), Some(json!("vpc-1")));
    }
}
