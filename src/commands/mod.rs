//! Command implementations
//!
//! Every command opens a [`Session`]: the validated configuration, the
//! resource catalog and the stack's state file.

pub mod apply;
pub mod outputs;
pub mod plan;
pub mod status;

use anyhow::{Context as AnyhowContext, Result};
use declarative::{ApplyReport, Catalog, FileStateStore, Provider, StateSnapshot, StateStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Context;
use crate::config::{ConfigError, KeelConfig};
use crate::paths;
use crate::provider::SandboxProvider;
use crate::stack::{self, Stack, catalog};

/// How a command that ran to completion went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Some node failed or was skipped
    Incomplete,
}

impl Outcome {
    pub fn from_report(report: &ApplyReport) -> Self {
        if report.is_success() {
            Self::Success
        } else {
            Self::Incomplete
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Incomplete => 1,
        }
    }
}

/// Exit code for an error that aborted a command
///
/// Problems found before anything was applied (configuration, graph
/// validation, planning) exit with 2, everything else with 1.
pub fn error_exit_code(err: &anyhow::Error) -> u8 {
    let before_apply = err.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || cause
                .downcast_ref::<declarative::Error>()
                .is_some_and(|e| e.category().is_pre_apply())
    });
    if before_apply { 2 } else { 1 }
}

pub struct Session {
    pub config: KeelConfig,
    pub catalog: Arc<Catalog>,
    pub store: FileStateStore,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let config_path = paths::config_file(ctx.config.as_deref());
        let config = KeelConfig::load(&config_path)?
            .with_stack_name(ctx.stack.as_deref())
            .context("Invalid --stack")?;

        let state_dir = paths::state_dir(ctx.state_dir.as_deref())?;
        let store = FileStateStore::new(paths::state_file(&state_dir, &config.stack.name));
        log::info!(
            "Stack {} (state: {})",
            config.stack.name,
            store.path().display()
        );

        Ok(Self {
            config,
            catalog: Arc::new(catalog::catalog()),
            store,
        })
    }

    pub fn stack_name(&self) -> &str {
        &self.config.stack.name
    }

    /// Desired graph for the configured stack
    pub fn stack(&self) -> Result<Stack> {
        stack::build(&self.config.stack, Arc::clone(&self.catalog))
            .context("Could not build the stack")
    }

    pub fn load_state(&self) -> Result<StateSnapshot> {
        self.store
            .load()
            .with_context(|| format!("Could not load state from {}", self.store.path().display()))
    }

    pub fn provider(&self) -> Result<Arc<dyn Provider>> {
        let provider = SandboxProvider::new(
            &self.config.sandbox,
            Arc::clone(&self.catalog),
            self.config.stack.region.clone(),
        )?;
        Ok(Arc::new(provider))
    }
}

/// Cancels its token on Ctrl-C until dropped
pub struct Interrupt {
    token: CancellationToken,
    listener: JoinHandle<()>,
}

impl Interrupt {
    pub fn listen() -> Self {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let listener = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, waiting for in-flight operations to stop");
                cancel.cancel();
            }
        });
        Self { token, listener }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for Interrupt {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
