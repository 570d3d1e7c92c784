//! Queue controller: the only writer of an action queue
//!
//! The controller owns the ordered action list and applies every state
//! transition. Callers get owned snapshots; a snapshot never changes after it
//! is handed out; `version()` tells whether a newer one exists.

use crate::models::action::{ActionStatus, JsonValue};
use crate::queue::action::{Action, QueueEntry};
use crate::queue::error::{QueueError, QueueResult};
use std::collections::HashSet;

/// Guarded state machine over an ordered list of actions
#[derive(Debug, Clone)]
pub struct QueueController {
    queue: Vec<Action>,
    version: u64,
}

impl QueueController {
    /// Build a controller from definitions and/or restored actions.
    ///
    /// Fails when a type is empty or appears twice, or when more than one
    /// restored action is active.
    pub fn new<I, E>(entries: I) -> QueueResult<Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<QueueEntry>,
    {
        let entries: Vec<QueueEntry> = entries.into_iter().map(Into::into).collect();
        check_types_are_unique_and_set(entries.iter().map(QueueEntry::action_type))?;

        let queue: Vec<Action> = entries.into_iter().map(QueueEntry::into_action).collect();
        check_at_most_one_active(&queue)?;
        tracing::debug!(actions = queue.len(), "queue created");

        Ok(Self { queue, version: 0 })
    }

    /// Snapshot of the current ordered action list
    pub fn get_queue(&self) -> Vec<Action> {
        self.queue.clone()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Incremented on every accepted mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get_by_type(&self, action_type: &str) -> Option<Action> {
        self.find(action_type).cloned()
    }

    /// First idle action in list order
    pub fn get_next(&self) -> Option<Action> {
        self.queue.iter().find(|a| a.is_idle()).cloned()
    }

    pub fn get_active(&self) -> Option<Action> {
        self.queue.iter().find(|a| a.is_active()).cloned()
    }

    pub fn get_complete(&self) -> Vec<Action> {
        self.queue.iter().filter(|a| a.is_complete()).cloned().collect()
    }

    pub fn get_failed(&self) -> Option<Action> {
        self.queue.iter().find(|a| a.is_failed()).cloned()
    }

    /// Stored result, only once the action has completed successfully
    pub fn get_result(&self, action: impl AsRef<str>) -> Option<JsonValue> {
        self.find(action.as_ref())
            .and_then(|a| a.result())
            .cloned()
    }

    /// True when any action failed or every action is complete
    pub fn is_finished(&self) -> bool {
        self.queue.iter().any(Action::is_failed) || self.queue.iter().all(Action::is_complete)
    }

    pub fn activate_action(&mut self, action: impl AsRef<str>) -> QueueResult<Vec<Action>> {
        self.update_if_possible(action.as_ref(), ActionStatus::Active)
    }

    pub fn complete_action(
        &mut self,
        action: impl AsRef<str>,
        result: JsonValue,
    ) -> QueueResult<Vec<Action>> {
        self.update_if_possible(action.as_ref(), ActionStatus::Succeeded(result))
    }

    pub fn set_action_failed(
        &mut self,
        action: impl AsRef<str>,
        error_message: impl Into<String>,
    ) -> QueueResult<Vec<Action>> {
        self.update_if_possible(action.as_ref(), ActionStatus::Failed(error_message.into()))
    }

    /// Replace the status of one action without transition checks.
    ///
    /// Every other action is copied unchanged into the new queue.
    pub fn update_action_and_queue(
        &mut self,
        action_type: &str,
        status: ActionStatus,
    ) -> QueueResult<Vec<Action>> {
        let position = self
            .queue
            .iter()
            .position(|a| a.action_type() == action_type)
            .ok_or_else(|| QueueError::NotFound(action_type.to_string()))?;

        tracing::debug!(
            action_type = action_type,
            from = self.queue[position].status().label(),
            to = status.label(),
            "action updated"
        );

        let updated = self.queue[position].with_status(status);
        self.queue = self
            .queue
            .iter()
            .enumerate()
            .map(|(i, a)| if i == position { updated.clone() } else { a.clone() })
            .collect();
        self.version += 1;

        Ok(self.get_queue())
    }

    /// Return every action to idle, keeping types and executors
    pub fn reset(&mut self) {
        self.queue = self
            .queue
            .iter()
            .map(|a| a.with_status(ActionStatus::Idle))
            .collect();
        self.version += 1;
        tracing::debug!(actions = self.queue.len(), "queue reset");
    }

    /// Drop every action
    pub fn clean(&mut self) {
        self.queue.clear();
        self.version += 1;
        tracing::debug!("queue cleaned");
    }

    /// Revert actions left active by an interrupted run back to idle.
    ///
    /// Returns the reverted types.
    pub fn release_interrupted(&mut self) -> Vec<String> {
        let interrupted: Vec<String> = self
            .queue
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.action_type().to_string())
            .collect();

        for action_type in &interrupted {
            tracing::warn!(action_type = %action_type, "releasing interrupted action");
            // Type comes from this queue, so the lookup cannot miss
            let _ = self.update_action_and_queue(action_type, ActionStatus::Idle);
        }

        interrupted
    }

    fn find(&self, action_type: &str) -> Option<&Action> {
        self.queue.iter().find(|a| a.action_type() == action_type)
    }

    fn update_if_possible(
        &mut self,
        action_type: &str,
        status: ActionStatus,
    ) -> QueueResult<Vec<Action>> {
        let action = self
            .find(action_type)
            .ok_or_else(|| QueueError::NotFound(action_type.to_string()))?;
        self.check_if_action_can_update(action, &status)?;
        self.update_action_and_queue(action_type, status)
    }

    fn check_if_action_can_update(&self, action: &Action, status: &ActionStatus) -> QueueResult<()> {
        let action_type = action.action_type();

        if action_type.is_empty() {
            return Err(QueueError::MissingType);
        }
        if action.is_failed() {
            return Err(QueueError::invalid_transition(action_type, "action has failed"));
        }
        if action.is_complete() {
            return Err(QueueError::invalid_transition(action_type, "action is complete"));
        }
        if status.is_active() {
            if action.is_active() {
                return Err(QueueError::invalid_transition(action_type, "action is already active"));
            }
            if let Some(other) = self.queue.iter().find(|a| a.is_active()) {
                return Err(QueueError::invalid_transition(
                    action_type,
                    format!("action {} is active", other.action_type()),
                ));
            }
        }

        Ok(())
    }
}

fn check_types_are_unique_and_set<'a>(types: impl Iterator<Item = &'a str>) -> QueueResult<()> {
    let mut unique_types = HashSet::new();
    for action_type in types {
        if action_type.is_empty() {
            return Err(QueueError::MissingType);
        }
        if !unique_types.insert(action_type) {
            return Err(QueueError::DuplicateType(action_type.to_string()));
        }
    }
    Ok(())
}

fn check_at_most_one_active(queue: &[Action]) -> QueueResult<()> {
    let active: Vec<&str> = queue
        .iter()
        .filter(|a| a.is_active())
        .map(Action::action_type)
        .collect();
    if active.len() > 1 {
        return Err(QueueError::MultipleActive(active.join(", ")));
    }
    Ok(())
}
