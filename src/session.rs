//! Session identifier resolution.
//!
//! The identifier correlating client AR state with server-side bookkeeping
//! can arrive from several places. Historically the precedence between them
//! drifted across screens; it is consolidated here into one ordered chain:
//! caller-supplied id, primary persisted key, legacy persisted key, fresh
//! creation via the backend.

use std::fmt;

use crate::api::http::{ApiError, BoothBackend};
use crate::store::{keys, KeyValueStore};

/// Opaque server-issued session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the session identifier for this attempt, persisting whatever the
/// chain produced so retries reuse it.
pub async fn resolve_session_id(
    explicit: Option<&str>,
    store: &dyn KeyValueStore,
    backend: &dyn BoothBackend,
) -> Result<SessionId, ApiError> {
    if let Some(id) = explicit {
        log::info!("Using caller-supplied session id");
        store.set(keys::SESSION_ID, id);
        return Ok(SessionId::new(id));
    }

    if let Some(id) = store.get(keys::SESSION_ID) {
        log::debug!("Using persisted session id");
        return Ok(SessionId::new(id));
    }

    if let Some(id) = store.get(keys::LEGACY_SESSION_ID) {
        log::info!("Migrating session id from legacy key");
        store.set(keys::SESSION_ID, &id);
        return Ok(SessionId::new(id));
    }

    log::info!("No stored session, creating a new one");
    let id = backend.create_session(false).await?;
    store.set(keys::SESSION_ID, &id);
    store.set(keys::LEGACY_SESSION_ID, &id);
    Ok(SessionId::new(id))
}
