//! Apply context and callback traits
//!
//! These traits keep the engine free of any particular terminal UI or
//! prompt implementation.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::provider::Provider;
use crate::types::{Action, ApplyResult, ExecuteSummary, ResourceId};

/// Progress callback for apply runs
///
/// Implement this trait to receive progress updates during execution.
/// Callbacks are invoked from the coordinator, never from worker tasks.
pub trait ProgressCallback: Send {
    /// Called once before any step starts
    fn on_apply_start(&mut self, steps: usize);

    /// Called when a step is handed to a worker
    fn on_step_start(&mut self, id: &ResourceId, action: Action);

    /// Called when a step finishes, fails or is skipped
    fn on_step_complete(&mut self, id: &ResourceId, result: &ApplyResult);

    /// Called once after the last step
    fn on_apply_complete(&mut self, summary: &ExecuteSummary);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_apply_start(&mut self, _steps: usize) {}
    fn on_step_start(&mut self, _id: &ResourceId, _action: Action) {}
    fn on_step_complete(&mut self, _id: &ResourceId, _result: &ApplyResult) {}
    fn on_apply_complete(&mut self, _summary: &ExecuteSummary) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(false)
    }
}

/// Collaborators of an apply run
pub struct ApplyContext<'a> {
    /// Backend every provider call goes to
    pub provider: Arc<dyn Provider>,
    /// Progress sink
    pub progress: &'a mut dyn ProgressCallback,
    /// Stops new steps and aborts in-flight ones
    pub cancel: CancellationToken,
}

impl<'a> ApplyContext<'a> {
    /// Create a context with a fresh cancellation token
    pub fn new(provider: Arc<dyn Provider>, progress: &'a mut dyn ProgressCallback) -> Self {
        Self {
            provider,
            progress,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token (Ctrl-C handler, tests)
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
