//! Persisted client-side state.
//!
//! The hosting shell supplies whatever durable key-value storage the platform
//! offers; everything persisted is a plain string.

use std::collections::HashMap;
use std::sync::Mutex;

/// Keys used by the booth core.
pub mod keys {
    /// Primary persisted session identifier.
    pub const SESSION_ID: &str = "ar_session_id";
    /// Session identifier under its pre-rename key; read for migration only.
    pub const LEGACY_SESSION_ID: &str = "current_session_id";
    /// Selected lens variant.
    pub const GROUP_SIZE: &str = "selected_group_size";
    /// Alternating photo counter, "0" or "1".
    pub const PHOTO_COUNTER: &str = "photo_counter";
    /// Last uploaded photo URL.
    pub const PHOTO_URL: &str = "user_photo";
    /// Last uploaded background-removed photo URL.
    pub const PHOTO_BG_REMOVED_URL: &str = "user_photo_bg_removed";
}

/// String key-value storage surviving reload within a visit.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory store, used in tests and as the default backing when the hosting
/// shell does not provide a persistent one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

/// Flip the persisted photo counter and return the value to tag the next
/// upload with. The counter alternates between "0" and "1" so the display
/// side can cache-bust between attempts.
pub fn toggle_photo_counter(store: &dyn KeyValueStore) -> String {
    let current = store
        .get(keys::PHOTO_COUNTER)
        .unwrap_or_else(|| "0".to_string());
    let next = if current == "0" { "1" } else { "0" };
    store.set(keys::PHOTO_COUNTER, next);
    next.to_string()
}

/// Undo a counter toggle after a failed upload so the next attempt reuses the
/// same value instead of skipping forward.
pub fn revert_photo_counter(store: &dyn KeyValueStore, attempted: &str) {
    let previous = if attempted == "0" { "1" } else { "0" };
    store.set(keys::PHOTO_COUNTER, previous);
}
