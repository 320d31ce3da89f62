//! Error types for reconciliation.
//!
//! Errors are categorized so callers can tell a malformed definition (fix the
//! stack) from a plan that has no safe migration, and so the executor can tell
//! transient provider failures (retry) from permanent ones.

use std::path::PathBuf;
use thiserror::Error;

use crate::provider::{ProviderError, ProviderErrorKind};
use crate::types::NodeStatus;

/// Categories of errors, used for retry decisions and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed desired state: validation, duplicate, cycle
    Definition,
    /// No safe change set exists
    Plan,
    /// Provider error expected to resolve on retry
    Transient,
    /// Provider error that will not resolve on retry
    Permanent,
    /// Work stopped by a cancellation signal
    Cancelled,
    /// Persisted state could not be read or written
    State,
    /// Engine invariant broken
    Internal,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Whether this error is detected before any provider call is made.
    pub fn is_pre_apply(&self) -> bool {
        matches!(self, Self::Definition | Self::Plan)
    }
}

/// Errors that can occur while building, planning or applying a graph.
///
/// Every variant names the offending resource where there is one.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed desired state
    #[error("invalid resource {id}: {message}")]
    Validation {
        /// Display form of the resource id (or config key)
        id: String,
        /// What is wrong with it
        message: String,
    },

    /// Two nodes share the same (type, name)
    #[error("duplicate resource: {id}")]
    DuplicateNode {
        /// Display form of the colliding id
        id: String,
    },

    /// The dependency graph is not acyclic
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle {
        /// Ids along the cycle, first and last being the same node
        path: Vec<String>,
    },

    /// The planner found no safe migration
    #[error("cannot plan {id}: {message}")]
    Plan {
        /// Display form of the resource id
        id: String,
        /// Why the change cannot be made
        message: String,
    },

    /// A provider call failed
    #[error("{id}: {source}")]
    Provider {
        /// Display form of the resource id
        id: String,
        /// Classified provider error
        #[source]
        source: ProviderError,
    },

    /// A node was asked to make a status move the lifecycle forbids
    #[error("resource {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Display form of the resource id
        id: String,
        /// Current status
        from: NodeStatus,
        /// Requested status
        to: NodeStatus,
    },

    /// State store failure
    #[error(transparent)]
    State(#[from] StateError),

    /// Confirmation prompt failed
    #[error("confirmation failed: {0}")]
    Confirm(#[source] std::io::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation { .. } | Error::DuplicateNode { .. } | Error::Cycle { .. } => {
                ErrorCategory::Definition
            }
            Error::Plan { .. } => ErrorCategory::Plan,
            Error::Provider { source, .. } => match source.kind {
                ProviderErrorKind::Transient => ErrorCategory::Transient,
                ProviderErrorKind::Permanent => ErrorCategory::Permanent,
                ProviderErrorKind::Cancelled => ErrorCategory::Cancelled,
            },
            Error::State(_) => ErrorCategory::State,
            Error::InvalidTransition { .. } | Error::Confirm(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    pub(crate) fn validation(id: impl ToString, message: impl Into<String>) -> Self {
        Error::Validation {
            id: id.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn plan(id: impl ToString, message: impl Into<String>) -> Self {
        Error::Plan {
            id: id.to_string(),
            message: message.into(),
        }
    }
}

/// Errors raised by state stores.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing the state file failed
    #[error("state I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid JSON for a snapshot
    #[error("state file {} is not a valid snapshot: {source}", path.display())]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Stored checksum does not match the stored records
    #[error("state file {} is corrupt: checksum {found} does not match {expected}", path.display())]
    Corrupt {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// State written by a newer version of this tool
    #[error("state version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Another writer saved a newer snapshot first
    #[error("snapshot serial {attempted} is not newer than stored serial {stored}")]
    Stale { stored: u64, attempted: u64 },
}

/// Result type using this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
