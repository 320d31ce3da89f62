//! # Declarative
//!
//! A dependency-aware reconciliation engine for declarative cloud resources.
//!
//! This crate takes a desired set of resources whose properties may refer to
//! each other's outputs, diffs it against the last applied state, and drives a
//! [`Provider`] through the resulting creates, updates, replaces and deletes
//! in dependency order.
//!
//! ## Core Concepts
//!
//! - **ResourceNode**: one managed object, `(type, name)` plus a property bag
//! - **Reference**: a property pointing at another node's output field
//! - **Graph**: validated DAG of nodes, built with [`GraphBuilder`]
//! - **ChangeSet**: ordered changes produced by [`plan`]
//! - **Executor**: applies a change set with bounded parallelism ([`apply`])
//! - **StateStore**: persists what was applied between runs
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     ApplyContext, Catalog, ExecuteOptions, FileStateStore, GraphBuilder,
//!     NoProgress, PropertyValue, ResourceSchema, StateStore, apply, plan, properties,
//! };
//!
//! let catalog = Arc::new(
//!     Catalog::new()
//!         .with(ResourceSchema::new("aws:ec2/vpc").required(["cidr_block"]).immutable(["cidr_block"]))
//!         .with(ResourceSchema::new("aws:eks/cluster").immutable(["vpc_id"])),
//! );
//!
//! let mut builder = GraphBuilder::new(catalog);
//! let vpc = builder.declare("aws:ec2/vpc", "vpc", properties([("cidr_block", "10.0.0.0/16")]))?;
//! builder.declare(
//!     "aws:eks/cluster",
//!     "main",
//!     properties([("vpc_id", PropertyValue::reference(&vpc, "id"))]),
//! )?;
//! let mut graph = builder.finish()?;
//!
//! let mut store = FileStateStore::new("state/dev.json");
//! let mut snapshot = store.load()?;
//! let changes = plan(&graph, &snapshot)?;
//!
//! let ctx = ApplyContext::new(provider, &mut NoProgress);
//! let report = apply(&mut graph, &changes, &mut store, &mut snapshot, &ExecuteOptions::default(), ctx).await?;
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Provider`]: performs create/update/delete/read calls against a backend
//! - [`StateStore`]: loads and saves state snapshots
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on a cloud
//! SDK, a storage backend or a terminal UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod schema;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{
    ApplyContext, AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback,
};
pub use diff::{DiffSummary, PropertyDiff, diff_properties, group_by_type};
pub use error::{Error, ErrorCategory, Result, StateError};
pub use executor::{ApplyReport, NodeResult, apply, execute};
pub use graph::{Graph, GraphBuilder};
pub use planner::{Change, ChangeSet, plan, plan_destroy};
pub use provider::{
    OperationKind, Provider, ProviderError, ProviderErrorKind, ProviderRequest, ProviderResponse,
};
pub use resource::{
    PropertyBag, PropertyValue, Reference, ResourceNode, Segment, UnresolvedReference, properties,
};
pub use retry::RetryConfig;
pub use schema::{Catalog, ResourceSchema};
pub use state::{FileStateStore, MemoryStateStore, STATE_VERSION, StateRecord, StateSnapshot, StateStore};
pub use types::{
    Action, ApplyResult, ExecuteOptions, ExecuteSummary, NodeStatus, Outputs, ResourceId,
};
