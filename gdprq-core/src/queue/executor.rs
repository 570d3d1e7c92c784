//! Action executor trait and types

use crate::models::action::JsonValue;
use crate::queue::action::Action;
use crate::queue::controller::QueueController;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// What an executor produced
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorOutcome {
    /// Finished in this page lifetime with a result
    Resolved(JsonValue),
    /// The browser must leave for this URL; the queue continues on the next
    /// page load
    Redirect(Url),
}

impl ExecutorOutcome {
    pub fn resolved(value: impl Into<JsonValue>) -> Self {
        ExecutorOutcome::Resolved(value.into())
    }
}

/// Trait for executing queue actions
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute an action
    ///
    /// # Arguments
    /// * `action` - Snapshot of the action being run (already active)
    /// * `queue` - Read access to the rest of the queue, e.g. earlier results
    ///
    /// # Returns
    /// The outcome; an `Err` marks the action failed with the error's message
    async fn execute(&self, action: &Action, queue: &QueueController) -> Result<ExecutorOutcome>;
}

/// Executor backed by a synchronous closure
pub struct FnExecutor<F>(F);

#[async_trait]
impl<F> ActionExecutor for FnExecutor<F>
where
    F: Fn(&Action, &QueueController) -> Result<ExecutorOutcome> + Send + Sync + 'static,
{
    async fn execute(&self, action: &Action, queue: &QueueController) -> Result<ExecutorOutcome> {
        (self.0)(action, queue)
    }
}

/// Wrap a closure as a shareable executor
pub fn executor_fn<F>(f: F) -> Arc<dyn ActionExecutor>
where
    F: Fn(&Action, &QueueController) -> Result<ExecutorOutcome> + Send + Sync + 'static,
{
    Arc::new(FnExecutor(f))
}
