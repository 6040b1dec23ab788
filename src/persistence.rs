//! Persistence bridge: remembers the last active thread per user role.
//!
//! Backed by a tiny key-value store. Nothing here is transactional: writes
//! are last-write-wins and an absent key just means "no prior selection".

use crate::threads::ThreadId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Transient flag set by the login flow; consumed on the next load.
pub const JUST_LOGGED_IN_KEY: &str = "authJustLoggedIn";

const LAST_ACTIVE_PREFIX: &str = "lastActiveThreadId_";

/// Minimal string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key)
    }
}

/// In-memory store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// JSON object on disk. The file is read once and rewritten on every change.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt state file");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read state file");
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(entries)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(&self.path, json)
        })();
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "Could not write state file");
        }
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_some() {
            self.flush(&entries);
        }
    }
}

/// Session-facing view of the key-value store, namespaced by user role so
/// that e.g. the regular and the admin chat surfaces don't collide.
pub struct PersistenceBridge {
    store: Box<dyn KeyValueStore>,
    user_type: String,
}

impl PersistenceBridge {
    pub fn new(store: Box<dyn KeyValueStore>, user_type: impl Into<String>) -> Self {
        Self {
            store,
            user_type: user_type.into(),
        }
    }

    pub fn last_active_key(&self) -> String {
        format!("{}{}", LAST_ACTIVE_PREFIX, self.user_type)
    }

    pub fn last_active_thread(&self) -> Option<ThreadId> {
        let raw = self.store.get(&self.last_active_key())?;
        let id = ThreadId::parse(&raw);
        if id.is_none() {
            debug!(raw = %raw, "Ignoring unparseable last active thread id");
        }
        id
    }

    pub fn remember_active_thread(&self, id: &ThreadId) {
        self.store.set(&self.last_active_key(), &id.to_string());
    }

    pub fn forget_active_thread(&self) {
        self.store.remove(&self.last_active_key());
    }

    /// Read and clear the "just logged in" flag.
    pub fn take_just_logged_in(&self) -> bool {
        match self.store.get(JUST_LOGGED_IN_KEY) {
            Some(value) => {
                self.store.remove(JUST_LOGGED_IN_KEY);
                !matches!(value.trim(), "" | "false" | "0")
            }
            None => false,
        }
    }

    /// Set by the login flow.
    pub fn mark_just_logged_in(&self) {
        self.store.set(JUST_LOGGED_IN_KEY, "true");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_user_type() {
        let shared = Arc::new(MemoryKeyValueStore::new());
        let user = PersistenceBridge::new(Box::new(shared.clone()), "user");
        let admin = PersistenceBridge::new(Box::new(shared.clone()), "admin");

        user.remember_active_thread(&ThreadId::server("c1"));
        admin.remember_active_thread(&ThreadId::server("c2"));

        assert_eq!(user.last_active_thread(), Some(ThreadId::server("c1")));
        assert_eq!(admin.last_active_thread(), Some(ThreadId::server("c2")));
        assert_eq!(shared.get("lastActiveThreadId_user").as_deref(), Some("c1"));
    }

    #[test]
    fn absent_selection_is_none() {
        let bridge = PersistenceBridge::new(Box::new(MemoryKeyValueStore::new()), "user");
        assert_eq!(bridge.last_active_thread(), None);
        bridge.forget_active_thread();
    }

    #[test]
    fn just_logged_in_is_consumed_on_read() {
        let bridge = PersistenceBridge::new(Box::new(MemoryKeyValueStore::new()), "user");
        assert!(!bridge.take_just_logged_in());
        bridge.mark_just_logged_in();
        assert!(bridge.take_just_logged_in());
        assert!(!bridge.take_just_logged_in());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileKeyValueStore::open(&path);
        store.set("lastActiveThreadId_user", "conv-9");
        store.set("other", "x");
        store.remove("other");

        let reopened = FileKeyValueStore::open(&path);
        assert_eq!(reopened.get("lastActiveThreadId_user").as_deref(), Some("conv-9"));
        assert_eq!(reopened.get("other"), None);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileKeyValueStore::open(&path);
        assert_eq!(store.get("anything"), None);
    }
}
