// Session store
// Durable key-value persistence of the token pair and user profile, plus a
// change-notification channel shared by every execution context over the
// same backend. The store is the single source of truth for the session;
// the context and the HTTP client both read through it.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::AuthError;
use crate::identity::types::{TokenPair, UserProfile};

/// Storage key for the serialized token pair
pub const TOKENS_KEY: &str = "tokens";

/// Storage key for the serialized user profile
pub const USER_KEY: &str = "user";

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Raw key-value persistence. Implementations must be shareable across
/// contexts; cross-key consistency is the `SessionStore`'s job.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// The persisted session as one logical unit.
/// Invariant: both underlying keys exist or neither does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub tokens: TokenPair,
    pub user: UserProfile,
}

/// What kind of mutation other contexts should know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A session record (or its token half) was written
    Saved,
    /// The session was cleared
    Cleared,
}

/// A mutation notice, stamped with the writing context's id so readers can
/// ignore their own writes.
#[derive(Debug, Clone, Copy)]
pub struct StoreChange {
    pub writer: u64,
    pub event: StoreEvent,
}

/// Change-notification hub shared by every store handle over one backend.
/// Eventually-consistent broadcast, not a lock: readers re-read storage on
/// receipt instead of trusting the event payload.
#[derive(Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<StoreChange>,
}

impl ChangeHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    fn publish(&self, change: StoreChange) {
        // nobody listening is fine
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One execution context's handle on the shared session storage.
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
    hub: ChangeHub,
    context_id: u64,
}

impl SessionStore {
    /// A store handle that shares `backend` and `hub` with other contexts.
    pub fn new(backend: Arc<dyn StorageBackend>, hub: ChangeHub) -> Self {
        Self {
            backend,
            hub,
            context_id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// A store handle with nothing to share notifications with.
    pub fn single(backend: Arc<dyn StorageBackend>) -> Self {
        Self::new(backend, ChangeHub::new())
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    /// Read the persisted session.
    ///
    /// A partial or unparsable record is cleared before reporting absence,
    /// so corrupt state never survives a read.
    pub fn load(&self) -> Option<SessionRecord> {
        let tokens_raw = self.read_key(TOKENS_KEY);
        let user_raw = self.read_key(USER_KEY);

        match (tokens_raw, user_raw) {
            (None, None) => None,
            (Some(tokens_raw), Some(user_raw)) => {
                match (
                    serde_json::from_str(&tokens_raw),
                    serde_json::from_str(&user_raw),
                ) {
                    (Ok(tokens), Ok(user)) => Some(SessionRecord { tokens, user }),
                    _ => {
                        tracing::warn!("unreadable session record, clearing");
                        self.clear();
                        None
                    }
                }
            }
            _ => {
                tracing::warn!("torn session record, clearing both keys");
                self.clear();
                None
            }
        }
    }

    /// Persist both halves of the record.
    ///
    /// Rolls the first key back if the second write fails so a torn record
    /// is never left behind.
    pub fn save(&self, record: &SessionRecord) -> Result<(), AuthError> {
        let tokens_raw =
            serde_json::to_string(&record.tokens).map_err(|e| AuthError::Storage(e.to_string()))?;
        let user_raw =
            serde_json::to_string(&record.user).map_err(|e| AuthError::Storage(e.to_string()))?;

        self.backend
            .set(TOKENS_KEY, &tokens_raw)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        if let Err(e) = self.backend.set(USER_KEY, &user_raw) {
            let _ = self.backend.remove(TOKENS_KEY);
            return Err(AuthError::Storage(e.to_string()));
        }

        self.hub.publish(StoreChange {
            writer: self.context_id,
            event: StoreEvent::Saved,
        });
        Ok(())
    }

    /// Replace the token pair of the existing record, leaving the profile
    /// untouched. Refuses when there is no profile half to pair with, since
    /// a lone `tokens` key would be a torn record.
    pub fn update_tokens(&self, tokens: &TokenPair) -> Result<(), AuthError> {
        match self.backend.get(USER_KEY) {
            Ok(Some(_)) => {}
            _ => {
                self.clear();
                return Err(AuthError::Storage("no session to update".to_string()));
            }
        }

        let tokens_raw =
            serde_json::to_string(tokens).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.backend
            .set(TOKENS_KEY, &tokens_raw)
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        self.hub.publish(StoreChange {
            writer: self.context_id,
            event: StoreEvent::Saved,
        });
        Ok(())
    }

    /// Remove both keys. Best-effort: storage failures are logged, never
    /// raised past this boundary.
    pub fn clear(&self) {
        for key in [TOKENS_KEY, USER_KEY] {
            if let Err(e) = self.backend.remove(key) {
                tracing::warn!(key, error = %e, "failed to clear session key");
            }
        }
        self.hub.publish(StoreChange {
            writer: self.context_id,
            event: StoreEvent::Cleared,
        });
    }

    /// Watch for mutations made through any handle on the same hub.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.hub.subscribe()
    }

    /// Whether `change` was written by a different execution context.
    pub fn is_external(&self, change: &StoreChange) -> bool {
        change.writer != self.context_id
    }

    fn read_key(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read session key");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token;

    fn test_record() -> SessionRecord {
        SessionRecord {
            tokens: TokenPair {
                access: token::forge_token(3600),
                refresh: "refresh-1".to_string(),
            },
            user: UserProfile {
                id: "7".to_string(),
                email: "ada@example.com".to_string(),
                first_name: Some("Ada".to_string()),
                last_name: None,
            },
        }
    }

    fn memory_store() -> SessionStore {
        SessionStore::single(Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = memory_store();
        let record = test_record();

        store.save(&record).unwrap();
        assert_eq!(store.load(), Some(record));
    }

    #[test]
    fn test_clear_removes_both_keys() {
        let store = memory_store();
        store.save(&test_record()).unwrap();

        store.clear();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_torn_record_self_heals() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let store = SessionStore::single(Arc::clone(&backend));

        // only the tokens half present
        let tokens_raw = serde_json::to_string(&test_record().tokens).unwrap();
        backend.set(TOKENS_KEY, &tokens_raw).unwrap();

        assert!(store.load().is_none());
        // the read cleared the surviving half
        assert!(backend.get(TOKENS_KEY).unwrap().is_none());
        assert!(backend.get(USER_KEY).unwrap().is_none());
    }

    #[test]
    fn test_unparsable_record_self_heals() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let store = SessionStore::single(Arc::clone(&backend));

        backend.set(TOKENS_KEY, "{not json").unwrap();
        backend
            .set(USER_KEY, r#"{"id": "7", "email": "ada@example.com"}"#)
            .unwrap();

        assert!(store.load().is_none());
        assert!(backend.get(USER_KEY).unwrap().is_none());
    }

    #[test]
    fn test_update_tokens_keeps_profile() {
        let store = memory_store();
        let record = test_record();
        store.save(&record).unwrap();

        let renewed = TokenPair {
            access: token::forge_token(7200),
            refresh: "refresh-2".to_string(),
        };
        store.update_tokens(&renewed).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.tokens, renewed);
        assert_eq!(loaded.user, record.user);
    }

    #[test]
    fn test_update_tokens_without_profile_refuses() {
        let store = memory_store();
        let renewed = test_record().tokens;

        assert!(store.update_tokens(&renewed).is_err());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_change_events_identify_the_writer() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let hub = ChangeHub::new();
        let writer = SessionStore::new(Arc::clone(&backend), hub.clone());
        let observer = SessionStore::new(backend, hub);

        let mut rx = observer.subscribe();
        writer.save(&test_record()).unwrap();

        let change = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(change.event, StoreEvent::Saved);
        assert!(observer.is_external(&change));
        assert!(!writer.is_external(&change));
    }

    #[test]
    fn test_clear_is_observed_as_cleared() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let hub = ChangeHub::new();
        let writer = SessionStore::new(Arc::clone(&backend), hub.clone());
        let observer = SessionStore::new(backend, hub);
        writer.save(&test_record()).unwrap();

        let mut rx = observer.subscribe();
        writer.clear();

        let change = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(change.event, StoreEvent::Cleared);
    }
}
