//! Session finalizer - turns the completion map into saved series
//!
//! One session row, then one batch of series-performed rows. If the batch
//! fails the session row is deleted again, and the caller keeps its local
//! progress so the user can retry.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::db::{DataStore, NewSession, SeriesPerformed};
use crate::error::SaveSessionError;
use crate::progress::CompletionStore;
use crate::routine::{Routine, RoutineKind};

/// Load recorded for completions that carry no detail
const NO_LOAD: &str = "0";

/// Result of a successful save
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSaved {
    pub session_id: i64,
    pub series_count: usize,
}

/// Everything needed to write the session row
#[derive(Debug, Clone)]
pub struct SessionSummary<'a> {
    pub routine_id: &'a str,
    pub kind: RoutineKind,
    pub student_id: &'a str,
    pub elapsed_secs: u64,
    pub created_at: DateTime<Utc>,
}

/// Series rows for every completed element that still resolves in `routine`
pub fn build_series(routine: &Routine, completion: &CompletionStore, session_id: i64) -> Vec<SeriesPerformed> {
    completion
        .iter()
        .filter(|(_, c)| c.is_done())
        .filter_map(|(element, c)| {
            let Some(resolved) = routine.resolve(element) else {
                warn!("Completed element {} not in routine, skipping", element);
                return None;
            };

            let detail = c.detail();
            let execution_type = detail
                .and_then(|d| d.execution_type)
                .unwrap_or_else(|| resolved.execution_type());
            let (reps, duration) = if execution_type.is_timed() {
                (None, Some(detail.and_then(|d| d.actual_duration_secs).unwrap_or(0)))
            } else {
                (Some(detail.and_then(|d| d.actual_reps).unwrap_or(0)), None)
            };

            Some(SeriesPerformed {
                session_id,
                exercise_id: resolved.exercise.exercise.id.clone(),
                set_number: element.number(),
                reps_performed: reps,
                load_performed: detail
                    .and_then(|d| d.actual_load.clone())
                    .unwrap_or_else(|| NO_LOAD.to_string()),
                duration_performed_secs: duration,
            })
        })
        .collect()
}

/// Save the session and its series
pub fn finalize(
    store: &dyn DataStore,
    routine: &Routine,
    completion: &CompletionStore,
    summary: &SessionSummary<'_>,
) -> Result<SessionSaved, SaveSessionError> {
    let session = NewSession {
        created_at: summary.created_at,
        duration_secs: summary.elapsed_secs,
        student_id: summary.student_id.to_string(),
        routine_id: summary.routine_id.to_string(),
        kind: summary.kind,
    };

    let session_id = store.insert_session(&session).map_err(|e| {
        error!("Session insert failed: {}", e);
        SaveSessionError::Session(e.to_string())
    })?;

    let rows = build_series(routine, completion, session_id);
    if !rows.is_empty()
        && let Err(e) = store.insert_series_performed(&rows)
    {
        error!("Series insert failed for session {}: {}", session_id, e);
        match store.delete_session(session_id) {
            Ok(()) => info!("Removed orphaned session {}", session_id),
            Err(del) => warn!("Could not remove orphaned session {}: {}", session_id, del),
        }
        return Err(SaveSessionError::Series {
            session_id,
            reason: e.to_string(),
        });
    }

    info!(
        "Session {} saved with {} series ({}s)",
        session_id,
        rows.len(),
        summary.elapsed_secs
    );
    Ok(SessionSaved {
        session_id,
        series_count: rows.len(),
    })
}
