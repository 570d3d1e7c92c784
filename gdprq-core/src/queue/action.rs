//! Actions and their static definitions

use crate::models::action::{ActionStatus, JsonValue, StoredAction};
use crate::queue::executor::ActionExecutor;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;

/// Static description of a queue step: a type and the executor running it
#[derive(Clone)]
pub struct ActionDefinition {
    pub action_type: String,
    pub executor: Arc<dyn ActionExecutor>,
}

impl ActionDefinition {
    pub fn new(action_type: impl Into<String>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            action_type: action_type.into(),
            executor,
        }
    }
}

impl fmt::Debug for ActionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDefinition")
            .field("action_type", &self.action_type)
            .finish_non_exhaustive()
    }
}

/// One step of a workflow with its run-state
#[derive(Clone)]
pub struct Action {
    action_type: String,
    executor: Arc<dyn ActionExecutor>,
    updated_at: i64,
    status: ActionStatus,
}

impl Action {
    /// Create an idle action from a definition
    pub fn from_definition(definition: ActionDefinition) -> Self {
        Self {
            action_type: definition.action_type,
            executor: definition.executor,
            updated_at: now_millis(),
            status: ActionStatus::Idle,
        }
    }

    /// Re-attach an executor to persisted state
    pub fn restore(definition: ActionDefinition, stored: &StoredAction) -> Self {
        Self {
            action_type: definition.action_type,
            executor: definition.executor,
            updated_at: stored.updated_at,
            status: stored.status(),
        }
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn executor(&self) -> Arc<dyn ActionExecutor> {
        Arc::clone(&self.executor)
    }

    /// Milliseconds since the Unix epoch of the last accepted change
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn status(&self) -> &ActionStatus {
        &self.status
    }

    pub fn is_idle(&self) -> bool {
        self.status.is_idle()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    pub fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    /// Result of a successfully completed action
    pub fn result(&self) -> Option<&JsonValue> {
        match &self.status {
            ActionStatus::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            ActionStatus::Failed(message) => Some(message),
            _ => None,
        }
    }

    /// The type/executor pair without run-state
    pub fn definition(&self) -> ActionDefinition {
        ActionDefinition {
            action_type: self.action_type.clone(),
            executor: self.executor(),
        }
    }

    pub fn to_stored(&self) -> StoredAction {
        StoredAction::from_status(&self.action_type, self.updated_at, &self.status)
    }

    /// Copy with a new status and a strictly newer timestamp
    pub(crate) fn with_status(&self, status: ActionStatus) -> Self {
        Self {
            action_type: self.action_type.clone(),
            executor: self.executor(),
            updated_at: now_millis().max(self.updated_at.saturating_add(1)),
            status,
        }
    }
}

impl AsRef<str> for Action {
    fn as_ref(&self) -> &str {
        &self.action_type
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("action_type", &self.action_type)
            .field("updated_at", &self.updated_at)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Queue construction input: a fresh definition or a restored action
#[derive(Debug, Clone)]
pub enum QueueEntry {
    Definition(ActionDefinition),
    Restored(Action),
}

impl QueueEntry {
    pub fn action_type(&self) -> &str {
        match self {
            QueueEntry::Definition(definition) => &definition.action_type,
            QueueEntry::Restored(action) => action.action_type(),
        }
    }

    pub fn into_action(self) -> Action {
        match self {
            QueueEntry::Definition(definition) => Action::from_definition(definition),
            QueueEntry::Restored(action) => action,
        }
    }
}

impl From<ActionDefinition> for QueueEntry {
    fn from(definition: ActionDefinition) -> Self {
        QueueEntry::Definition(definition)
    }
}

impl From<Action> for QueueEntry {
    fn from(action: Action) -> Self {
        QueueEntry::Restored(action)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
