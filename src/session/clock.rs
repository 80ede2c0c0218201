//! Clocks - wall time source plus the workout and rest timers
//!
//! Both timers store an absolute timestamp and derive what they display from
//! it, so a backgrounded or reloaded app shows the right numbers.

use std::cell::Cell;
use std::rc::Rc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::routine::ElementRef;
use crate::storage::{
    KeyValueStore, REST_DURATION_KEY, REST_END_KEY, REST_EXERCISE_KEY, REST_ORIGIN_KEY,
    WORKOUT_START_KEY, remove_or_log, write_or_log,
};

/// Epoch milliseconds source
pub trait Clock {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<i64>>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now.set(ms);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.now.set(self.now.get() + secs * 1000);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }
}

fn ceil_secs(ms: i64) -> u64 {
    if ms <= 0 { 0 } else { ((ms + 999) / 1000) as u64 }
}

// ============ WORKOUT CLOCK ============

/// Total workout time, anchored at `workoutStartTime`
#[derive(Debug, Default, Clone)]
pub struct WorkoutClock {
    started_ms: Option<i64>,
}

impl WorkoutClock {
    /// Pick up a running workout or start one now
    pub fn resume_or_start(storage: &mut dyn KeyValueStore, now_ms: i64) -> Self {
        let stored = match storage.get(WORKOUT_START_KEY) {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()),
            Err(e) => {
                warn!("Failed to read workout start: {}", e);
                None
            }
        };

        match stored {
            Some(ms) if ms <= now_ms => Self { started_ms: Some(ms) },
            _ => Self::start(storage, now_ms),
        }
    }

    /// Start a fresh workout now, replacing any stored anchor
    pub fn start(storage: &mut dyn KeyValueStore, now_ms: i64) -> Self {
        write_or_log(storage, WORKOUT_START_KEY, &now_ms.to_string());
        Self {
            started_ms: Some(now_ms),
        }
    }

    /// Read the stored anchor without starting anything
    pub fn peek(storage: &dyn KeyValueStore) -> Self {
        let started_ms = match storage.get(WORKOUT_START_KEY) {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()),
            Err(e) => {
                warn!("Failed to read workout start: {}", e);
                None
            }
        };
        Self { started_ms }
    }

    pub fn started_ms(&self) -> Option<i64> {
        self.started_ms
    }

    pub fn elapsed_secs(&self, now_ms: i64) -> u64 {
        match self.started_ms {
            Some(start) if now_ms > start => ((now_ms - start) / 1000) as u64,
            _ => 0,
        }
    }

    pub fn stop(&mut self, storage: &mut dyn KeyValueStore) {
        self.started_ms = None;
        remove_or_log(storage, WORKOUT_START_KEY);
    }
}

// ============ REST CLOCK ============

/// A scheduled rest window
#[derive(Debug, Clone, PartialEq)]
pub struct RestTimerState {
    pub end_ms: i64,
    /// Exercise name of the element that follows the rest
    pub next_name: String,
    pub original_secs: u32,
    /// Element whose completion started the rest
    pub origin: Option<ElementRef>,
}

impl RestTimerState {
    pub fn time_left_secs(&self, now_ms: i64) -> u64 {
        ceil_secs(self.end_ms - now_ms)
    }

    pub fn has_elapsed(&self, now_ms: i64) -> bool {
        self.end_ms <= now_ms
    }
}

/// What the rest display needs on each tick
#[derive(Debug, Clone, PartialEq)]
pub struct RestSnapshot {
    pub time_left_secs: u64,
    pub original_secs: u32,
    pub next_name: String,
}

/// Rest countdown persisted as `restEndTime` and friends
#[derive(Debug, Default, Clone)]
pub struct RestClock {
    state: Option<RestTimerState>,
}

impl RestClock {
    /// Read a rest window left behind by a previous run
    pub fn restore(storage: &dyn KeyValueStore) -> Self {
        let read = |key: &str| match storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read {}: {}", key, e);
                None
            }
        };

        let Some(end_ms) = read(REST_END_KEY).and_then(|v| v.parse::<i64>().ok()) else {
            return Self::default();
        };

        let origin = read(REST_ORIGIN_KEY).and_then(|raw| match ElementRef::decode(&raw) {
            Ok(el) => Some(el),
            Err(e) => {
                warn!("Dropping rest origin: {}", e);
                None
            }
        });

        Self {
            state: Some(RestTimerState {
                end_ms,
                next_name: read(REST_EXERCISE_KEY).unwrap_or_default(),
                original_secs: read(REST_DURATION_KEY)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                origin,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&RestTimerState> {
        self.state.as_ref()
    }

    pub fn start(
        &mut self,
        storage: &mut dyn KeyValueStore,
        now_ms: i64,
        duration_secs: u32,
        next_name: &str,
        origin: &ElementRef,
    ) -> &RestTimerState {
        let state = RestTimerState {
            end_ms: now_ms + i64::from(duration_secs) * 1000,
            next_name: next_name.to_string(),
            original_secs: duration_secs,
            origin: Some(origin.clone()),
        };

        write_or_log(storage, REST_END_KEY, &state.end_ms.to_string());
        write_or_log(storage, REST_EXERCISE_KEY, &state.next_name);
        write_or_log(storage, REST_DURATION_KEY, &duration_secs.to_string());
        write_or_log(storage, REST_ORIGIN_KEY, &origin.encode());
        debug!("Rest started: {}s, next {}", duration_secs, next_name);

        self.state.insert(state)
    }

    pub fn snapshot(&self, now_ms: i64) -> Option<RestSnapshot> {
        self.state.as_ref().map(|s| RestSnapshot {
            time_left_secs: s.time_left_secs(now_ms),
            original_secs: s.original_secs,
            next_name: s.next_name.clone(),
        })
    }

    pub fn stop(&mut self, storage: &mut dyn KeyValueStore) -> Option<RestTimerState> {
        Self::discard(storage);
        self.state.take()
    }

    /// Drop a persisted rest window without loading it
    pub fn discard(storage: &mut dyn KeyValueStore) {
        for key in [REST_END_KEY, REST_EXERCISE_KEY, REST_DURATION_KEY, REST_ORIGIN_KEY] {
            remove_or_log(storage, key);
        }
    }
}
