//! Durable key/value preferences
//!
//! Values are JSON so anything serializable round-trips. The only preference
//! the app reads today is the speech toggle, exposed through [`SpeechPreference`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;

use crate::db::DbPool;
use crate::{Error, Result};

/// Key under which the speech toggle is stored
pub const SPEECH_ENABLED_KEY: &str = "isSpeechOn";

/// Speech playback is on until the user turns it off
pub const SPEECH_ENABLED_DEFAULT: bool = true;

/// String-keyed storage for JSON values
pub trait PreferenceStore: Send + Sync {
    /// Read a value, `None` if never written
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backing store cannot be read
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backing store cannot be written
    fn set(&self, key: &str, value: &Value) -> Result<()>;
}

/// `SQLite`-backed preference store
pub struct SqlitePreferenceStore {
    db: DbPool,
}

impl SqlitePreferenceStore {
    /// Create a store backed by the given pool
    #[must_use]
    pub const fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl PreferenceStore for SqlitePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.db.get()?;
        let result = conn.query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| Error::Storage(format!("corrupt value for {key}: {e}"))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        let conn = self.db.get()?;
        conn.execute(
            "INSERT INTO preferences (key, value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            rusqlite::params![key, raw],
        )?;
        Ok(())
    }
}

/// Process-local preference store
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryPreferenceStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self
            .values
            .lock()
            .map_err(|_| Error::Storage("preference lock poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| Error::Storage("preference lock poisoned".to_string()))?;
        values.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// The durable "speech enabled" flag plus change notification
///
/// Readers hold a [`watch::Receiver`] from [`SpeechPreference::subscribe`] and
/// observe each accepted change. A write that fails to persist is never published.
pub struct SpeechPreference {
    tx: watch::Sender<bool>,
    store: Arc<dyn PreferenceStore>,
}

impl SpeechPreference {
    /// Load the flag from the store
    ///
    /// Absent, unreadable or non-boolean values fall back to the default.
    pub fn load(store: Arc<dyn PreferenceStore>) -> Self {
        let initial = match store.get(SPEECH_ENABLED_KEY) {
            Ok(Some(Value::Bool(enabled))) => enabled,
            Ok(Some(other)) => {
                tracing::warn!(value = %other, "ignoring non-boolean speech preference");
                SPEECH_ENABLED_DEFAULT
            }
            Ok(None) => SPEECH_ENABLED_DEFAULT,
            Err(e) => {
                tracing::error!(error = %e, "failed to load speech preference");
                SPEECH_ENABLED_DEFAULT
            }
        };

        tracing::debug!(enabled = initial, "speech preference loaded");
        let (tx, _rx) = watch::channel(initial);
        Self { tx, store }
    }

    /// Current value
    #[must_use]
    pub fn enabled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Persist a new value, then notify subscribers
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the value could not be written; the
    /// current value is left unchanged in that case
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.store.set(SPEECH_ENABLED_KEY, &Value::Bool(enabled))?;
        self.tx.send_replace(enabled);
        tracing::info!(enabled, "speech preference updated");
        Ok(())
    }

    /// Subscribe to changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
