//! Queue runner: drives a controller to completion across page lifetimes

use crate::models::action::{ActionStatus, JsonValue, StoredQueue, STORED_QUEUE_VERSION};
use crate::queue::action::{ActionDefinition, QueueEntry};
use crate::queue::controller::QueueController;
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::executor::ExecutorOutcome;
use crate::queue::storage::{load_queue, remove_queue, store_queue, StorageBackend};
use crate::queue::validation::validate_queue_key;
use serde::Serialize;
use std::sync::Arc;
use url::Url;

/// Failure message recorded when an executor error has no text
pub const UNKNOWN_ERROR: &str = "unknown error";

/// How a call to [`QueueRunner::run`] ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every action completed; results in queue order
    Completed { results: Vec<(String, JsonValue)> },
    /// An action failed and the queue stopped
    Failed {
        action_type: String,
        error_message: String,
    },
    /// An action needs the browser to leave for `url`. The queue is stored
    /// and continues on the next page load.
    Redirect { action_type: String, url: Url },
}

impl RunOutcome {
    /// Result of one action from a completed run
    pub fn result(&self, action_type: &str) -> Option<&JsonValue> {
        match self {
            RunOutcome::Completed { results } => results
                .iter()
                .find(|(t, _)| t == action_type)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

/// Queue progress for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueProgress {
    pub key: String,
    pub total: usize,
    pub completed: usize,
    pub active: Option<String>,
    pub next: Option<String>,
    pub failed: Option<String>,
    pub finished: bool,
}

/// Drives one named queue, persisting after every transition
pub struct QueueRunner {
    key: String,
    controller: QueueController,
    storage: Arc<dyn StorageBackend>,
}

impl QueueRunner {
    /// Resume the queue stored under `key`, or build a fresh one.
    ///
    /// An action left active by an interrupted page lifetime is returned to
    /// idle so it runs again.
    pub fn resume_or_start(
        key: impl Into<String>,
        definitions: Vec<ActionDefinition>,
        storage: Arc<dyn StorageBackend>,
    ) -> QueueResult<Self> {
        let key = key.into();
        validate_queue_key(&key)?;

        let entries = match load_queue(storage.as_ref(), &key, &definitions) {
            Some(entries) => {
                tracing::info!(key = %key, "resuming stored queue");
                entries
            }
            None => {
                tracing::info!(key = %key, "starting new queue");
                definitions.into_iter().map(QueueEntry::from).collect()
            }
        };

        let mut controller = QueueController::new(entries)?;
        controller.release_interrupted();

        let runner = Self {
            key,
            controller,
            storage,
        };
        runner.persist()?;
        Ok(runner)
    }

    /// Discard any stored state and build a fresh queue
    pub fn start_new(
        key: impl Into<String>,
        definitions: Vec<ActionDefinition>,
        storage: Arc<dyn StorageBackend>,
    ) -> QueueResult<Self> {
        let key = key.into();
        validate_queue_key(&key)?;
        remove_queue(storage.as_ref(), &key)?;
        Self::resume_or_start(key, definitions, storage)
    }

    /// True when an unfinished queue is stored under `key`
    pub fn should_resume(storage: &dyn StorageBackend, key: &str) -> bool {
        match storage.read(key) {
            Ok(Some(raw)) => serde_json::from_str::<StoredQueue>(&raw)
                .map(|stored| {
                    let active = stored
                        .actions
                        .iter()
                        .filter(|a| matches!(a.status(), ActionStatus::Active))
                        .count();
                    stored.version == STORED_QUEUE_VERSION && !stored.is_finished() && active <= 1
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn controller(&self) -> &QueueController {
        &self.controller
    }

    /// Run idle actions in order until the queue finishes or redirects
    pub async fn run(&mut self) -> QueueResult<RunOutcome> {
        loop {
            if self.controller.is_finished() {
                return self.finish();
            }

            let next = self.controller.get_next().ok_or(QueueError::Inconsistent)?;
            self.controller.activate_action(&next)?;
            self.persist()?;

            let action = self
                .controller
                .get_by_type(next.action_type())
                .ok_or_else(|| QueueError::NotFound(next.action_type().to_string()))?;
            tracing::debug!(key = %self.key, action_type = action.action_type(), "executing action");

            let outcome = action.executor().execute(&action, &self.controller).await;

            match outcome {
                Ok(ExecutorOutcome::Resolved(value)) => {
                    self.controller.complete_action(&action, value)?;
                    self.persist()?;
                    tracing::info!(key = %self.key, action_type = action.action_type(), "action completed");
                }
                Ok(ExecutorOutcome::Redirect(url)) => {
                    self.controller
                        .complete_action(&action, JsonValue::String(url.to_string()))?;
                    self.persist()?;
                    tracing::info!(
                        key = %self.key,
                        action_type = action.action_type(),
                        url = %url,
                        "action requested redirect"
                    );
                    return Ok(RunOutcome::Redirect {
                        action_type: action.action_type().to_string(),
                        url,
                    });
                }
                Err(e) => {
                    let message = match e.to_string() {
                        m if m.trim().is_empty() => UNKNOWN_ERROR.to_string(),
                        m => m,
                    };
                    tracing::warn!(
                        key = %self.key,
                        action_type = action.action_type(),
                        error = %message,
                        "action failed"
                    );
                    self.controller.set_action_failed(&action, message)?;
                    self.persist()?;
                }
            }
        }
    }

    pub fn progress(&self) -> QueueProgress {
        QueueProgress {
            key: self.key.clone(),
            total: self.controller.len(),
            completed: self.controller.get_complete().len(),
            active: self
                .controller
                .get_active()
                .map(|a| a.action_type().to_string()),
            next: self
                .controller
                .get_next()
                .map(|a| a.action_type().to_string()),
            failed: self
                .controller
                .get_failed()
                .map(|a| a.action_type().to_string()),
            finished: self.controller.is_finished(),
        }
    }

    /// Clear stored state and restart from the first action
    pub fn reset(&mut self) -> QueueResult<()> {
        remove_queue(self.storage.as_ref(), &self.key)?;
        self.controller.reset();
        tracing::info!(key = %self.key, "queue reset");
        Ok(())
    }

    /// Remove stored state and drop every action
    pub fn clean(mut self) -> QueueResult<()> {
        remove_queue(self.storage.as_ref(), &self.key)?;
        self.controller.clean();
        Ok(())
    }

    fn finish(&mut self) -> QueueResult<RunOutcome> {
        if let Some(failed) = self.controller.get_failed() {
            let outcome = RunOutcome::Failed {
                action_type: failed.action_type().to_string(),
                error_message: failed.error_message().unwrap_or_default().to_string(),
            };
            tracing::info!(key = %self.key, action_type = failed.action_type(), "queue failed");
            return Ok(outcome);
        }

        let results = self
            .controller
            .get_complete()
            .into_iter()
            .map(|a| {
                let value = a.result().cloned().unwrap_or(JsonValue::Null);
                (a.action_type().to_string(), value)
            })
            .collect();

        remove_queue(self.storage.as_ref(), &self.key)?;
        tracing::info!(key = %self.key, "queue completed");
        Ok(RunOutcome::Completed { results })
    }

    fn persist(&self) -> QueueResult<()> {
        store_queue(self.storage.as_ref(), &self.key, &self.controller.get_queue())
    }
}
