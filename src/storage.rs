//! Durable local key space - the device-side store that survives reloads
//!
//! Holds session start times, the completion map, the workout start time and
//! the rest timer snapshot. Writes are best-effort: callers log failures and
//! keep going with their in-memory state.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;

use crate::error::StorageError;

pub const WORKOUT_START_KEY: &str = "workoutStartTime";
pub const REST_END_KEY: &str = "restEndTime";
pub const REST_EXERCISE_KEY: &str = "restExerciseName";
pub const REST_DURATION_KEY: &str = "restOriginalDuration";
pub const REST_ORIGIN_KEY: &str = "restOriginElement";

pub fn session_key(routine_id: &str) -> String {
    format!("workout-session-{}", routine_id)
}

pub fn progress_key(routine_id: &str) -> String {
    format!("workout-progress-{}", routine_id)
}

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Write a key, logging instead of failing
pub fn write_or_log(storage: &mut dyn KeyValueStore, key: &str, value: &str) {
    if let Err(e) = storage.set(key, value) {
        warn!("Failed to persist {}: {}", key, e);
    }
}

/// Remove a key, logging instead of failing
pub fn remove_or_log(storage: &mut dyn KeyValueStore, key: &str) {
    if let Err(e) = storage.remove(key) {
        warn!("Failed to remove {}: {}", key, e);
    }
}

/// In-process store, used by tests and as a fallback when no file is wanted
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
    read_only: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write, like a full or disabled browser store
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::Unavailable("storage is read-only".into()));
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::Unavailable("storage is read-only".into()));
        }
        self.entries.remove(key);
        Ok(())
    }
}

/// SQLite-backed key space for the CLI and TUI
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open or create the state file
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }
}

impl KeyValueStore for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}
