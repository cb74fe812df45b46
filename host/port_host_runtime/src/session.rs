//! Durable key/value storage and the single-key session adapter on top of it.

use crate::protocol::MAX_SESSION_BYTES;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

pub const SESSION_KEY: &str = "session";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("session of {bytes} bytes exceeds the {limit} byte limit")]
    TooLarge { bytes: usize, limit: usize },
    #[error("storage lock poisoned")]
    Poisoned,
}

/// A durable string key/value store. Each call is atomic for its single key.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

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
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Stores each key as its own file under `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            key: String::new(),
            source,
        })?;
        debug!(dir = %dir.display(), "opened file store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let io_err = |source: io::Error| StoreError::Io {
            key: key.to_string(),
            source,
        };

        // Rename over the old file so readers never see a partial write.
        fs::write(&tmp, value).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Reads and writes the session record under [`SESSION_KEY`] as JSON text.
#[derive(Debug)]
pub struct SessionStore<S> {
    store: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<Option<String>, StoreError> {
        self.store.get(SESSION_KEY)
    }

    /// Persists `session`, refusing anything too large to hand back to the
    /// application at the next start.
    pub fn store(&self, session: &Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(session)?;
        if text.len() > MAX_SESSION_BYTES {
            return Err(StoreError::TooLarge {
                bytes: text.len(),
                limit: MAX_SESSION_BYTES,
            });
        }
        self.store.set(SESSION_KEY, &text)?;
        debug!(bytes = text.len(), "stored session");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(SESSION_KEY)?;
        debug!("cleared session");
        Ok(())
    }

    /// Returns the stored session, or `Value::Null` when nothing usable is
    /// stored. Read failures and malformed text are logged, never returned.
    pub fn load_session(&self) -> Value {
        let raw = match self.load() {
            Ok(Some(raw)) => raw,
            Ok(None) => return Value::Null,
            Err(err) => {
                warn!("failed to read stored session: {err}");
                return Value::Null;
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(session) => session,
            Err(err) => {
                warn!("stored session is not valid JSON, ignoring it: {err}");
                Value::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_then_load_preserves_session_content() {
        let sessions = SessionStore::new(MemoryStore::new());
        let session = json!({"token": "xyz", "user": {"id": 7, "roles": ["admin"]}});

        sessions.store(&session).expect("store session");

        let raw = sessions.load().expect("load").expect("stored text");
        let parsed: Value = serde_json::from_str(&raw).expect("parse stored text");
        assert_eq!(parsed, session);
        assert_eq!(sessions.load_session(), session);
    }

    #[test]
    fn store_overwrites_previous_value() {
        let sessions = SessionStore::new(MemoryStore::new());
        sessions.store(&json!({"token": "old"})).expect("first store");
        sessions.store(&json!({"token": "new"})).expect("second store");
        assert_eq!(sessions.load_session(), json!({"token": "new"}));
    }

    #[test]
    fn oversized_session_is_refused_and_previous_kept() {
        let sessions = SessionStore::new(MemoryStore::new());
        sessions.store(&json!({"token": "small"})).expect("store");

        let err = sessions
            .store(&json!({"token": "x".repeat(MAX_SESSION_BYTES)}))
            .expect_err("too large");

        assert!(matches!(err, StoreError::TooLarge { limit: MAX_SESSION_BYTES, .. }));
        assert_eq!(sessions.load_session(), json!({"token": "small"}));
    }

    #[test]
    fn clear_is_idempotent() {
        let sessions = SessionStore::new(MemoryStore::new());
        sessions.store(&json!({"token": "abc"})).expect("store");

        sessions.clear().expect("first clear");
        assert_eq!(sessions.load().expect("load"), None);

        sessions.clear().expect("second clear");
        assert_eq!(sessions.load().expect("load"), None);
    }

    #[test]
    fn stored_text_is_parsed_into_structured_session() {
        let store = MemoryStore::new();
        store.set(SESSION_KEY, r#"{"token":"abc"}"#).expect("seed");
        let sessions = SessionStore::new(&store);
        assert_eq!(sessions.load_session(), json!({"token": "abc"}));
    }

    #[test]
    fn malformed_or_absent_session_loads_as_null() {
        let store = MemoryStore::new();
        let sessions = SessionStore::new(&store);
        assert_eq!(sessions.load_session(), Value::Null);

        store.set(SESSION_KEY, "not-json").expect("seed");
        assert_eq!(sessions.load_session(), Value::Null);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = json!({"token": "persisted"});

        SessionStore::new(FileStore::open(dir.path()).expect("open"))
            .store(&session)
            .expect("store");

        let reopened = SessionStore::new(FileStore::open(dir.path()).expect("reopen"));
        assert_eq!(reopened.load_session(), session);
        assert!(dir.path().join("session.json").exists());
        assert!(!dir.path().join("session.json.tmp").exists());
    }

    #[test]
    fn file_store_clear_of_absent_key_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sessions = SessionStore::new(FileStore::open(dir.path()).expect("open"));

        sessions.clear().expect("clear absent");
        sessions.clear().expect("clear absent again");
        assert_eq!(sessions.load().expect("load"), None);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).expect("open");

        assert!(matches!(
            store.set("../escape", "x"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(store.get(""), Err(StoreError::InvalidKey(_))));
    }
}
