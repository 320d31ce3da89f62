//! Provider call interface
//!
//! The engine never talks to a cloud API directly. Every create, update,
//! delete or lookup goes through a [`Provider`], which may finish immediately
//! or hand back an operation handle to poll.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{Outputs, ResourceId};

/// Operation requested from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    /// Lookup of an object the stack does not own (data source)
    Read,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
        };
        f.write_str(label)
    }
}

/// A single provider call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub id: ResourceId,
    pub kind: OperationKind,
    /// Fully resolved input properties
    pub inputs: Outputs,
    /// Outputs recorded by the last successful apply, if any
    pub prior_outputs: Option<Outputs>,
}

/// Answer to an invoke or poll
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    /// Operation finished with these outputs
    Done(Outputs),
    /// Operation still running; poll with this handle
    Pending { operation: String },
}

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Rate limiting, eventual consistency; retried with backoff
    Transient,
    /// Will not resolve on retry
    Permanent,
    /// Aborted by a cancellation signal
    Cancelled,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Error returned by a provider call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} provider error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: ProviderErrorKind::Cancelled,
            message: "operation cancelled".to_string(),
        }
    }

    /// Whether the executor should retry the call
    pub fn is_retryable(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}

/// Abstraction over whatever cloud API is targeted
///
/// Implementations must be safe to call concurrently for different
/// resources; the executor never issues two calls for the same resource at
/// the same time.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start (or complete) an operation
    async fn invoke(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Check on an operation previously answered with `Pending`
    async fn poll(
        &self,
        request: &ProviderRequest,
        operation: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::permanent(format!(
            "{} returned pending operation {operation} but the provider cannot poll",
            request.id
        )))
    }
}
