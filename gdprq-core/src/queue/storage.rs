//! Queue persistence across page lifetimes
//!
//! A queue is stored as a versioned JSON document under its key. Only the
//! run-state is written; executors are re-bound from the caller's action
//! definitions when the queue is loaded. Stored data is a cache: anything
//! unreadable is treated as "no stored queue".

use crate::models::action::{ActionStatus, StoredAction, StoredQueue, STORED_QUEUE_VERSION};
use crate::queue::action::{Action, ActionDefinition, QueueEntry};
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::validation::validate_queue_key;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key/value medium that survives a page reload
pub trait StorageBackend: Send + Sync {
    /// Read the value stored under `key`, `None` if absent
    fn read(&self, key: &str) -> QueueResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn write(&self, key: &str, value: &str) -> QueueResult<()>;

    /// Delete `key`; deleting a missing key is not an error
    fn remove(&self, key: &str) -> QueueResult<()>;
}

/// One JSON file per key inside a directory
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create storage rooted at `dir`, creating the directory if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> QueueResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        tracing::debug!(dir = ?dir, "file queue storage ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> QueueResult<PathBuf> {
        validate_queue_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> QueueResult<Option<String>> {
        let path = self.path_for(key)?;

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Shared lock for reading, released when the file is dropped
        file.lock_shared()?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(file);
        reader.read_to_string(&mut contents)?;

        if contents.is_empty() {
            return Ok(None);
        }
        Ok(Some(contents))
    }

    fn write(&self, key: &str, value: &str) -> QueueResult<()> {
        let path = self.path_for(key)?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // Truncate only once the exclusive lock is held
        file.lock_exclusive()?;
        file.set_len(0)?;

        let mut writer = std::io::BufWriter::new(file);
        writer.write_all(value.as_bytes())?;
        writer.flush()?;

        tracing::trace!(path = ?path, bytes = value.len(), "queue written");
        Ok(())
    }

    fn remove(&self, key: &str) -> QueueResult<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process storage, lost when the process exits
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> QueueResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| QueueError::Storage("memory storage lock poisoned".to_string()))
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> QueueResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> QueueResult<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> QueueResult<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// Serialize the run-state of `queue` under `key`
pub fn store_queue<B>(backend: &B, key: &str, queue: &[Action]) -> QueueResult<()>
where
    B: StorageBackend + ?Sized,
{
    let stored = StoredQueue::new(queue.iter().map(Action::to_stored).collect());
    let json = serde_json::to_string(&stored)?;
    backend.write(key, &json)?;

    tracing::debug!(key = key, actions = queue.len(), "queue stored");
    Ok(())
}

/// Restore a stored queue, re-binding executors from `definitions`.
///
/// The result follows the order of `definitions`. Definitions without stored
/// state become fresh idle entries; stored actions without a definition are
/// dropped. Missing or unreadable data yields `None`.
pub fn load_queue<B>(
    backend: &B,
    key: &str,
    definitions: &[ActionDefinition],
) -> Option<Vec<QueueEntry>>
where
    B: StorageBackend + ?Sized,
{
    let raw = match backend.read(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key = key, error = %e, "failed to read stored queue");
            return None;
        }
    };

    let stored: StoredQueue = match serde_json::from_str(&raw) {
        Ok(stored) => stored,
        Err(e) => {
            tracing::warn!(key = key, error = %e, "ignoring malformed stored queue");
            return None;
        }
    };

    if stored.version != STORED_QUEUE_VERSION {
        tracing::warn!(
            key = key,
            version = stored.version,
            "ignoring stored queue with unknown version"
        );
        return None;
    }

    let active = stored
        .actions
        .iter()
        .filter(|a| matches!(a.status(), ActionStatus::Active))
        .count();
    if active > 1 {
        tracing::warn!(key = key, active = active, "ignoring stored queue with several active actions");
        return None;
    }

    let mut by_type: HashMap<&str, &StoredAction> = HashMap::new();
    for action in &stored.actions {
        by_type.entry(action.action_type.as_str()).or_insert(action);
    }

    for action in &stored.actions {
        if !definitions
            .iter()
            .any(|d| d.action_type == action.action_type)
        {
            tracing::debug!(key = key, action_type = %action.action_type, "dropping unknown stored action");
        }
    }

    let entries = definitions
        .iter()
        .map(|definition| match by_type.get(definition.action_type.as_str()) {
            Some(stored) => QueueEntry::Restored(Action::restore(definition.clone(), stored)),
            None => QueueEntry::Definition(definition.clone()),
        })
        .collect();

    Some(entries)
}

/// Delete the stored queue under `key`
pub fn remove_queue<B>(backend: &B, key: &str) -> QueueResult<()>
where
    B: StorageBackend + ?Sized,
{
    backend.remove(key)?;
    tracing::debug!(key = key, "stored queue removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::executor::{executor_fn, ExecutorOutcome};
    use serde_json::json;
    use tempfile::tempdir;

    fn definitions(types: &[&str]) -> Vec<ActionDefinition> {
        types
            .iter()
            .map(|t| {
                ActionDefinition::new(
                    *t,
                    executor_fn(|_, _| Ok(ExecutorOutcome::resolved(json!(true)))),
                )
            })
            .collect()
    }

    #[test]
    fn test_file_storage_read_write_remove() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("queues")).unwrap();

        assert_eq!(storage.read("downloadProfile").unwrap(), None);

        storage.write("downloadProfile", "{\"a\":1}").unwrap();
        storage.write("downloadProfile", "{}").unwrap();
        assert_eq!(
            storage.read("downloadProfile").unwrap(),
            Some("{}".to_string())
        );

        storage.remove("downloadProfile").unwrap();
        storage.remove("downloadProfile").unwrap();
        assert_eq!(storage.read("downloadProfile").unwrap(), None);
    }

    #[test]
    fn test_file_storage_rejects_unsafe_key() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        let err = storage.write("../escape", "{}").unwrap_err();
        assert!(matches!(err, QueueError::InvalidKey(_)));
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let storage = MemoryStorage::new();
        let defs = definitions(&["a"]);

        assert!(load_queue(&storage, "q", &defs).is_none());

        storage.write("q", "not json").unwrap();
        assert!(load_queue(&storage, "q", &defs).is_none());

        storage
            .write("q", r#"{"version":99,"actions":[]}"#)
            .unwrap();
        assert!(load_queue(&storage, "q", &defs).is_none());
    }

    #[test]
    fn test_load_follows_definition_order_and_drops_unknown() {
        let storage = MemoryStorage::new();
        storage
            .write(
                "q",
                r#"{"version":1,"actions":[
                    {"type":"gone","updatedAt":1,"complete":true,"active":false,"result":1},
                    {"type":"b","updatedAt":2,"complete":true,"active":false,"result":"x"}
                ]}"#,
            )
            .unwrap();

        let entries = load_queue(&storage, "q", &definitions(&["a", "b", "c"])).unwrap();
        let types: Vec<&str> = entries.iter().map(QueueEntry::action_type).collect();
        assert_eq!(types, vec!["a", "b", "c"]);

        assert!(matches!(entries[0], QueueEntry::Definition(_)));
        match &entries[1] {
            QueueEntry::Restored(action) => {
                assert_eq!(action.result(), Some(&json!("x")));
                assert_eq!(action.updated_at(), 2);
            }
            other => panic!("expected restored entry, got {:?}", other),
        }
        assert!(matches!(entries[2], QueueEntry::Definition(_)));
    }

    #[test]
    fn test_load_ignores_several_active_actions() {
        let storage = MemoryStorage::new();
        storage
            .write(
                "q",
                r#"{"version":1,"actions":[
                    {"type":"a","updatedAt":1,"complete":false,"active":true},
                    {"type":"b","updatedAt":2,"complete":false,"active":true}
                ]}"#,
            )
            .unwrap();

        assert!(load_queue(&storage, "q", &definitions(&["a", "b"])).is_none());
    }
}
