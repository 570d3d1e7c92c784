//! Action run-state and persisted queue records

use serde::{Deserialize, Serialize};

/// JSON-serializable action result
pub type JsonValue = serde_json::Value;

/// Current version of the persisted queue envelope
pub const STORED_QUEUE_VERSION: u32 = 1;

/// Run-state of a single action
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ActionStatus {
    /// Waiting to be picked by the runner
    #[default]
    Idle,
    /// Executor is running
    Active,
    /// Finished with a result
    Succeeded(JsonValue),
    /// Finished with an error message
    Failed(String),
}

impl ActionStatus {
    /// True for both success and failure
    pub fn is_complete(&self) -> bool {
        matches!(self, ActionStatus::Succeeded(_) | ActionStatus::Failed(_))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ActionStatus::Active)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ActionStatus::Idle)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ActionStatus::Failed(_))
    }

    /// Short lowercase label used in logs and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            ActionStatus::Idle => "idle",
            ActionStatus::Active => "active",
            ActionStatus::Succeeded(_) => "complete",
            ActionStatus::Failed(_) => "failed",
        }
    }
}

/// Persisted form of one action.
///
/// Executors are never stored; they are re-bound by `type` on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub updated_at: i64,
    pub complete: bool,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StoredAction {
    /// Flatten a status into the persisted flag layout
    pub fn from_status(action_type: &str, updated_at: i64, status: &ActionStatus) -> Self {
        let (complete, active, result, error_message) = match status {
            ActionStatus::Idle => (false, false, None, None),
            ActionStatus::Active => (false, true, None, None),
            ActionStatus::Succeeded(value) => (true, false, Some(value.clone()), None),
            ActionStatus::Failed(message) => (true, false, None, Some(message.clone())),
        };

        Self {
            action_type: action_type.to_string(),
            updated_at,
            complete,
            active,
            result,
            error_message,
        }
    }

    /// Rebuild the status from persisted flags.
    ///
    /// `complete` wins over `active`; a complete record carrying an error
    /// message is a failure.
    pub fn status(&self) -> ActionStatus {
        if self.complete {
            match &self.error_message {
                Some(message) => ActionStatus::Failed(message.clone()),
                None => ActionStatus::Succeeded(self.result.clone().unwrap_or(JsonValue::Null)),
            }
        } else if self.active {
            ActionStatus::Active
        } else {
            ActionStatus::Idle
        }
    }
}

/// Versioned envelope written under a queue key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredQueue {
    pub version: u32,
    pub actions: Vec<StoredAction>,
}

impl StoredQueue {
    pub fn new(actions: Vec<StoredAction>) -> Self {
        Self {
            version: STORED_QUEUE_VERSION,
            actions,
        }
    }

    /// Same rule as the live queue: any failure, or everything complete
    pub fn is_finished(&self) -> bool {
        let statuses: Vec<ActionStatus> = self.actions.iter().map(StoredAction::status).collect();
        statuses.iter().any(ActionStatus::is_failed) || statuses.iter().all(ActionStatus::is_complete)
    }
}
