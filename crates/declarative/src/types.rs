//! Core types for declarative resource management

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::retry::RetryConfig;

/// Provider-assigned outputs of a resource (or resolved inputs sent to it)
pub type Outputs = serde_json::Map<String, serde_json::Value>;

/// Identity of a managed resource: its type plus a logical name
///
/// Ordering is lexical by type, then by name. Displayed as `type::name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceId {
    pub resource_type: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.resource_type, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("::") {
            Some((resource_type, name)) if !resource_type.is_empty() && !name.is_empty() => {
                Ok(Self::new(resource_type, name))
            }
            _ => Err(Error::Validation {
                id: s.to_string(),
                message: "expected an id of the form type::name".to_string(),
            }),
        }
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Lifecycle status of a node during a reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    #[default]
    Pending,
    Applying,
    Applied,
    Failed,
    /// Terminal status of an instance removed from the stack
    ///
    /// Graph members never reach it: a node leaving the desired graph is
    /// only tracked in state, and its delete is reported as
    /// [`ApplyResult::Deleted`]. A replaced node is recreated, so it ends
    /// Applied.
    Deleted,
}

impl NodeStatus {
    /// Allowed moves: Pending -> Applying -> {Applied | Failed}, Applied -> Deleted
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Applying)
                | (Self::Applying, Self::Applied)
                | (Self::Applying, Self::Failed)
                | (Self::Applied, Self::Deleted)
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// Kind of change the planner decided for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Create,
    Update,
    /// Delete-then-recreate, triggered by a change to an immutable property
    Replace,
    Delete,
}

impl Action {
    /// Short symbol used when rendering plans
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
        }
    }

    /// Whether the action removes an existing instance
    pub fn deletes(self) -> bool {
        matches!(self, Self::Replace | Self::Delete)
    }

    /// Whether the action produces a (new or updated) instance
    pub fn creates(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Replace)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// Result of applying one node of a change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// Resource was created
    Created,
    /// Resource was updated in place
    Updated,
    /// Resource was deleted and recreated
    Replaced,
    /// Resource was deleted
    Deleted,
    /// Apply failed
    Failed { error: String },
    /// Apply was never attempted
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure, not skipped)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }

    /// Result reported for a successful run of the given action
    pub fn for_action(action: Action) -> Self {
        match action {
            Action::Create => Self::Created,
            Action::Update => Self::Updated,
            Action::Replace => Self::Replaced,
            Action::Delete => Self::Deleted,
        }
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful (nothing failed or skipped)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::Created => self.created += 1,
            ApplyResult::Updated => self.updated += 1,
            ApplyResult::Replaced => self.replaced += 1,
            ApplyResult::Deleted => self.deleted += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of provider operations in flight
    pub jobs: usize,
    /// Retry policy for transient provider errors
    pub retry: RetryConfig,
    /// Delay between polls of a long-running provider operation
    pub poll_interval: Duration,
    /// Give up on a long-running operation after this long
    pub poll_timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(30 * 60),
        }
    }
}
