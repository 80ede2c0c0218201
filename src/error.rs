//! Error types for the workout core
//!
//! Collaborator calls return opaque `anyhow` errors; they are mapped into
//! these at the call site so the presentation layer only sees a small set
//! of retryable failures.

use thiserror::Error;

/// Routine or last-session read failed.
#[derive(Debug, Clone, Error)]
#[error("fetch failed for routine {routine_id}: {reason}")]
pub struct FetchError {
    pub routine_id: String,
    pub reason: String,
}

impl FetchError {
    pub fn new(routine_id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self {
            routine_id: routine_id.into(),
            reason: err.to_string(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        "No se pudo cargar la rutina"
    }
}

/// Durable local storage failure. Never fatal: in-memory state stays authoritative.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Malformed element id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid element id {id:?}: {reason}")]
pub struct DecodeError {
    pub id: String,
    pub reason: &'static str,
}

impl DecodeError {
    pub fn new(id: &str, reason: &'static str) -> Self {
        Self {
            id: id.to_string(),
            reason,
        }
    }
}

/// Remote insert failure while finalizing a session.
#[derive(Debug, Error)]
pub enum SaveSessionError {
    #[error("session insert failed: {0}")]
    Session(String),

    #[error("series insert failed for session {session_id}: {reason}")]
    Series { session_id: i64, reason: String },
}

impl SaveSessionError {
    pub fn user_message(&self) -> &'static str {
        "No se pudo guardar la sesión, inténtalo de nuevo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_message() {
        let err = FetchError::new("r1", "connection refused");
        assert!(err.to_string().contains("r1"));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.user_message(), "No se pudo cargar la rutina");
    }

    #[test]
    fn test_decode_error_message() {
        let err = DecodeError::new("bogus", "unknown kind");
        assert!(err.to_string().contains("bogus"));
        assert!(err.to_string().contains("unknown kind"));
    }

    #[test]
    fn test_save_error_is_retryable_message() {
        let err = SaveSessionError::Series {
            session_id: 7,
            reason: "timeout".into(),
        };
        assert!(err.to_string().contains("session 7"));
        assert!(err.user_message().contains("inténtalo"));
    }
}
