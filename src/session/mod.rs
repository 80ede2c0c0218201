//! Session module - one routine being trained, start to finish
//!
//! `RoutineSession` owns the routine tree, its ordered element sequence, the
//! completion store, the coordinator and both clocks. Every UI action goes
//! through it so the pieces stay in step.

pub mod clock;
pub mod coordinator;
pub mod finalize;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::db::{DataStore, LastSession, SeriesPerformed};
use crate::error::{FetchError, SaveSessionError};
use crate::notify::{NoopNotifier, Notifier};
use crate::progress::{CompletionDetail, CompletionStore, Progress, aggregate};
use crate::routine::{ElementRef, ElementSequence, Routine, RoutineKind, SubBlockKind};
use crate::storage::KeyValueStore;

pub use clock::{Clock, ManualClock, RestClock, RestSnapshot, RestTimerState, SystemClock, WorkoutClock};
pub use coordinator::{Coordinator, ROUTINE_COMPLETE_LABEL, SessionView, Transition};
pub use finalize::{SessionSaved, SessionSummary, build_series, finalize};

/// What the user entered for an element before ticking it off
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElementInput {
    pub load: String,
    pub reps: u32,
    pub duration_secs: u32,
}

/// Detail stored with a completion, shaped by the series' execution type
pub fn build_detail(routine: &Routine, element: &ElementRef, input: &ElementInput) -> Option<CompletionDetail> {
    let resolved = routine.resolve(element)?;
    let execution_type = resolved.execution_type();
    let (reps, duration) = if execution_type.is_timed() {
        (None, Some(input.duration_secs))
    } else {
        (Some(input.reps), None)
    };

    Some(CompletionDetail {
        element_kind: element.kind(),
        pause_secs: Some(resolved.pause_secs()),
        sub_block_id: Some(resolved.sub_block.id.clone()),
        actual_load: Some(input.load.clone()),
        execution_type: Some(execution_type),
        actual_reps: reps,
        actual_duration_secs: duration,
    })
}

fn view<'a>(routine: &'a Routine, sequence: &'a ElementSequence, completion: &'a CompletionStore) -> SessionView<'a> {
    SessionView {
        routine,
        sequence,
        completion,
    }
}

pub struct RoutineSession<S, C> {
    routine: Routine,
    kind: RoutineKind,
    sequence: ElementSequence,
    completion: CompletionStore,
    coordinator: Coordinator,
    workout: WorkoutClock,
    storage: S,
    clock: C,
    last_session: Option<LastSession>,
}

impl<S: KeyValueStore, C: Clock> RoutineSession<S, C> {
    /// Restore (or start) the session for `routine`.
    ///
    /// The transition is `Some` when a rest ran out while the app was closed.
    /// Without live progress (none yet, or expired) the workout clock starts
    /// over and any leftover rest is dropped.
    pub fn open(
        routine: Routine,
        kind: RoutineKind,
        storage: S,
        clock: C,
        notifier: &dyn Notifier,
    ) -> (Self, Option<Transition>) {
        Self::restore(routine, kind, storage, clock, notifier, true)
    }

    /// Look at a session without starting its workout clock
    pub fn peek(routine: Routine, kind: RoutineKind, storage: S, clock: C) -> Self {
        Self::restore(routine, kind, storage, clock, &NoopNotifier, false).0
    }

    fn restore(
        routine: Routine,
        kind: RoutineKind,
        mut storage: S,
        clock: C,
        notifier: &dyn Notifier,
        start: bool,
    ) -> (Self, Option<Transition>) {
        let now = clock.now_ms();
        let sequence = ElementSequence::build(&routine);
        let completion = CompletionStore::load(&mut storage, &routine.id, now);

        let fresh = completion.session_started_ms().is_none();
        if fresh {
            RestClock::discard(&mut storage);
        }
        let workout = match (start, fresh) {
            (true, true) => WorkoutClock::start(&mut storage, now),
            (true, false) => WorkoutClock::resume_or_start(&mut storage, now),
            (false, true) => WorkoutClock::default(),
            (false, false) => WorkoutClock::peek(&storage),
        };

        let (coordinator, transition) = Coordinator::resume(
            &view(&routine, &sequence, &completion),
            &mut storage,
            now,
            notifier,
        );

        info!(
            "Opened routine {} ({}): {} elements, {} done",
            routine.id,
            kind,
            sequence.len(),
            completion.len()
        );

        let session = Self {
            routine,
            kind,
            sequence,
            completion,
            coordinator,
            workout,
            storage,
            clock,
            last_session: None,
        };
        (session, transition)
    }

    /// Swap in a refreshed tree; progress is kept for elements that still exist
    pub fn replace_routine(&mut self, routine: Routine) {
        if routine.id != self.routine.id {
            let now = self.clock.now_ms();
            self.completion = CompletionStore::load(&mut self.storage, &routine.id, now);
            self.coordinator.reset(&mut self.storage);
            if self.completion.session_started_ms().is_none() {
                self.workout = WorkoutClock::start(&mut self.storage, now);
            }
            self.last_session = None;
        }
        self.sequence = ElementSequence::build(&routine);
        self.routine = routine;
        self.coordinator
            .retarget(&view(&self.routine, &self.sequence, &self.completion));
        debug!("Routine replaced, {} elements", self.sequence.len());
    }

    pub fn routine(&self) -> &Routine {
        &self.routine
    }

    pub fn kind(&self) -> RoutineKind {
        self.kind
    }

    pub fn sequence(&self) -> &ElementSequence {
        &self.sequence
    }

    pub fn completion(&self) -> &CompletionStore {
        &self.completion
    }

    pub fn active(&self) -> Option<&ElementRef> {
        self.coordinator.active()
    }

    pub fn is_resting(&self) -> bool {
        self.coordinator.is_resting()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn progress(&self) -> Progress {
        aggregate(&self.routine, &self.completion)
    }

    /// Progress counted over one block only
    pub fn progress_for_block(&self, block_id: &str) -> Option<Progress> {
        let filtered = self.routine.filtered_to_block(block_id)?;
        Some(aggregate(&filtered, &self.completion))
    }

    pub fn is_routine_completed(&self) -> bool {
        self.progress().is_routine_completed()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.workout.elapsed_secs(self.clock.now_ms())
    }

    pub fn rest_snapshot(&self) -> Option<RestSnapshot> {
        self.coordinator.rest_snapshot(self.clock.now_ms())
    }

    /// Form values for an element: last session's numbers, then the series' suggestions
    pub fn default_input(&self, element: &ElementRef) -> ElementInput {
        let Some(resolved) = self.routine.resolve(element) else {
            return ElementInput::default();
        };

        if let Some(previous) = self.previous_performance(element) {
            return ElementInput {
                load: previous.load_performed.clone(),
                reps: previous.reps_performed.unwrap_or_else(|| resolved.suggested_reps()),
                duration_secs: previous
                    .duration_performed_secs
                    .unwrap_or_else(|| resolved.suggested_duration()),
            };
        }

        ElementInput {
            load: resolved.suggested_load(),
            reps: resolved.suggested_reps(),
            duration_secs: resolved.suggested_duration(),
        }
    }

    pub fn set_last_session(&mut self, last: Option<LastSession>) {
        self.last_session = last;
    }

    /// Fetch what this student did the last time they trained this routine
    pub fn load_last_session(&mut self, store: &dyn DataStore, student_id: &str) -> Result<(), FetchError> {
        let last = store
            .fetch_last_session(&self.routine.id, self.kind, student_id)
            .map_err(|e| FetchError::new(&self.routine.id, e))?;
        self.last_session = last;
        Ok(())
    }

    pub fn previous_performance(&self, element: &ElementRef) -> Option<&SeriesPerformed> {
        let resolved = self.routine.resolve(element)?;
        self.last_session
            .as_ref()?
            .for_exercise(&resolved.exercise.exercise.id, element.number())
    }

    /// Flip one element. `None` when the element is not part of this routine.
    pub fn toggle(&mut self, element: &ElementRef, input: Option<ElementInput>) -> Option<Transition> {
        if !self.sequence.contains(element) {
            warn!("Ignoring toggle of unknown element {}", element);
            return None;
        }

        let now = self.clock.now_ms();
        let input = input.unwrap_or_else(|| self.default_input(element));
        let detail = build_detail(&self.routine, element, &input);
        let done = self.completion.toggle(&mut self.storage, now, element, detail);

        let view = view(&self.routine, &self.sequence, &self.completion);
        let transition = if done {
            self.coordinator
                .on_completed(&view, &mut self.storage, now, element)
        } else {
            self.coordinator.on_uncompleted(element)
        };
        Some(transition)
    }

    /// Flip a whole superset round at once
    pub fn toggle_round(&mut self, sub_block_id: &str, round: u32) -> Option<Transition> {
        let sub_block = self.routine.find_sub_block(sub_block_id)?;
        if sub_block.kind != SubBlockKind::Superset || round == 0 || round > sub_block.superset_round_count {
            warn!("No round {} in sub-block {}", round, sub_block_id);
            return None;
        }
        let elements = sub_block.round_elements(round);
        let (first, last) = (elements.first()?.clone(), elements.last()?.clone());

        let now = self.clock.now_ms();
        let inputs: Vec<ElementInput> = elements.iter().map(|el| self.default_input(el)).collect();
        let routine = &self.routine;
        let mut index = 0;
        let done = self
            .completion
            .toggle_group(&mut self.storage, now, &elements, |el| {
                let input = inputs.get(index).cloned().unwrap_or_default();
                index += 1;
                build_detail(routine, el, &input)
            });

        let view = view(&self.routine, &self.sequence, &self.completion);
        let transition = if done {
            self.coordinator.on_completed(&view, &mut self.storage, now, &last)
        } else {
            self.coordinator.on_uncompleted(&first)
        };
        Some(transition)
    }

    pub fn skip_rest(&mut self) -> Option<Transition> {
        let view = view(&self.routine, &self.sequence, &self.completion);
        self.coordinator.skip_rest(&view, &mut self.storage)
    }

    /// Drive the rest countdown; call about once a second
    pub fn tick(&mut self) -> Option<Transition> {
        let now = self.clock.now_ms();
        let view = view(&self.routine, &self.sequence, &self.completion);
        self.coordinator.tick(&view, &mut self.storage, now)
    }

    /// Save the session. Local progress is only cleared once the save succeeded.
    pub fn finish(&mut self, store: &dyn DataStore, student_id: &str) -> Result<SessionSaved, SaveSessionError> {
        let now = self.clock.now_ms();
        let summary = SessionSummary {
            routine_id: &self.routine.id,
            kind: self.kind,
            student_id,
            elapsed_secs: self.workout.elapsed_secs(now),
            created_at: DateTime::from_timestamp_millis(now).unwrap_or_else(Utc::now),
        };

        let saved = finalize(store, &self.routine, &self.completion, &summary)?;

        self.completion.clear(&mut self.storage);
        self.workout.stop(&mut self.storage);
        self.coordinator.reset(&mut self.storage);
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewSession};
    use crate::routine::tests::{block, routine, series, slot, sub_block};
    use crate::routine::RawRoutine;
    use crate::storage::{MemoryStorage, REST_END_KEY, WORKOUT_START_KEY};

    fn strength() -> Routine {
        routine(vec![
            block(
                "b1",
                1,
                vec![
                    sub_block(
                        "sb1",
                        1,
                        "Principal",
                        SubBlockKind::Simple,
                        vec![slot("e1", "ex-1", "Sentadilla", vec![series(1, 8, 30), series(2, 6, 0)])],
                    ),
                    sub_block(
                        "ss",
                        2,
                        "Superserie",
                        SubBlockKind::Superset,
                        vec![
                            slot("a", "ex-a", "Press", vec![series(1, 10, 60)]),
                            slot("b", "ex-b", "Remo", vec![series(1, 12, 45)]),
                        ],
                    ),
                ],
            ),
            block(
                "b2",
                2,
                vec![sub_block(
                    "core",
                    1,
                    "Core",
                    SubBlockKind::Simple,
                    vec![slot("p", "ex-p", "Plancha", vec![series(1, 1, 0)])],
                )],
            ),
        ])
    }

    fn open(storage: MemoryStorage, clock: &ManualClock) -> RoutineSession<MemoryStorage, ManualClock> {
        RoutineSession::open(strength(), RoutineKind::Base, storage, clock.clone(), &NoopNotifier).0
    }

    fn input(reps: u32, load: &str) -> Option<ElementInput> {
        Some(ElementInput {
            load: load.into(),
            reps,
            duration_secs: 0,
        })
    }

    #[test]
    fn test_open_starts_on_first_element() {
        let clock = ManualClock::new(1_000);
        let session = open(MemoryStorage::new(), &clock);
        assert_eq!(session.active(), Some(&ElementRef::simple("sb1", "e1", 1)));
        assert_eq!(session.sequence().len(), 5);
        assert_eq!(session.storage().get(WORKOUT_START_KEY).unwrap().as_deref(), Some("1000"));
    }

    #[test]
    fn test_toggle_records_detail_and_rests() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        let set1 = ElementRef::simple("sb1", "e1", 1);

        let t = session.toggle(&set1, input(9, "60")).unwrap();
        assert!(matches!(t, Transition::RestStarted { duration_secs: 30, .. }));

        let detail = session.completion().get(&set1).unwrap().detail().unwrap().clone();
        assert_eq!(detail.actual_reps, Some(9));
        assert_eq!(detail.actual_load.as_deref(), Some("60"));
        assert_eq!(detail.pause_secs, Some(30));
        assert_eq!(session.progress().global_percent, 20);

        clock.advance_secs(10);
        assert_eq!(session.rest_snapshot().unwrap().time_left_secs, 20);
        assert!(session.tick().is_none());

        clock.advance_secs(20);
        let t = session.tick().unwrap();
        assert_eq!(
            t,
            Transition::RestFinished {
                active: Some(ElementRef::simple("sb1", "e1", 2))
            }
        );
    }

    #[test]
    fn test_toggle_unknown_element_is_ignored() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        assert!(session.toggle(&ElementRef::simple("nope", "x", 1), None).is_none());
        assert!(session.completion().is_empty());
    }

    #[test]
    fn test_default_input_from_series() {
        let clock = ManualClock::new(0);
        let session = open(MemoryStorage::new(), &clock);
        let input = session.default_input(&ElementRef::simple("sb1", "e1", 2));
        assert_eq!(input.reps, 6);
        assert_eq!(input.load, "20");
    }

    #[test]
    fn test_default_input_prefers_last_session() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        session.set_last_session(Some(LastSession {
            session_id: 3,
            created_at: Utc::now(),
            series: vec![SeriesPerformed {
                session_id: 3,
                exercise_id: "ex-1".into(),
                set_number: 1,
                reps_performed: Some(7),
                load_performed: "55".into(),
                duration_performed_secs: None,
            }],
        }));

        let set1 = ElementRef::simple("sb1", "e1", 1);
        assert_eq!(session.previous_performance(&set1).unwrap().reps_performed, Some(7));
        assert_eq!(session.default_input(&set1).load, "55");
        assert!(session.previous_performance(&ElementRef::simple("sb1", "e1", 2)).is_none());
    }

    #[test]
    fn test_toggle_round_completes_siblings_and_rests() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);

        let t = session.toggle_round("ss", 1).unwrap();
        assert!(matches!(t, Transition::RestStarted { duration_secs: 60, ref next_name, .. } if next_name == "Plancha"));
        assert!(session.completion().is_completed(&ElementRef::superset_round("ss", "a", 1)));
        assert!(session.completion().is_completed(&ElementRef::superset_round("ss", "b", 1)));
        assert!(session.progress().sub_block("ss").is_completed);

        let t = session.toggle_round("ss", 1).unwrap();
        assert_eq!(
            t,
            Transition::Revisit {
                active: ElementRef::superset_round("ss", "a", 1)
            }
        );
        assert!(!session.completion().is_completed(&ElementRef::superset_round("ss", "b", 1)));

        assert!(session.toggle_round("ss", 2).is_none());
        assert!(session.toggle_round("sb1", 1).is_none());
    }

    #[test]
    fn test_reopen_restores_progress_and_rest() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        session.toggle(&ElementRef::simple("sb1", "e1", 1), None);
        let storage = session.storage().clone();

        clock.advance_secs(5);
        let reopened = open(storage, &clock);
        assert!(reopened.is_resting());
        assert_eq!(reopened.rest_snapshot().unwrap().time_left_secs, 25);
        assert_eq!(reopened.completion().len(), 1);
        assert_eq!(reopened.elapsed_secs(), 5);
    }

    #[test]
    fn test_expired_progress_restarts_workout_clock() {
        const HOUR_MS: i64 = 60 * 60 * 1000;
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        session.toggle(&ElementRef::simple("sb1", "e1", 1), None);
        assert!(session.is_resting());
        let storage = session.storage().clone();

        clock.set(13 * HOUR_MS);
        let (reopened, transition) =
            RoutineSession::open(strength(), RoutineKind::Base, storage, clock.clone(), &NoopNotifier);
        assert!(transition.is_none());
        assert!(reopened.completion().is_empty());
        assert_eq!(reopened.elapsed_secs(), 0);
        assert!(!reopened.is_resting());
        assert!(reopened.storage().get(REST_END_KEY).unwrap().is_none());
        assert_eq!(
            reopened.storage().get(WORKOUT_START_KEY).unwrap(),
            Some((13 * HOUR_MS).to_string())
        );
    }

    #[test]
    fn test_peek_does_not_start_workout() {
        let clock = ManualClock::new(5_000);
        let peeked = RoutineSession::peek(strength(), RoutineKind::Base, MemoryStorage::new(), clock.clone());
        assert_eq!(peeked.elapsed_secs(), 0);
        assert!(peeked.storage().get(WORKOUT_START_KEY).unwrap().is_none());
        assert_eq!(peeked.active(), Some(&ElementRef::simple("sb1", "e1", 1)));

        let mut session = open(MemoryStorage::new(), &clock);
        session.toggle(&ElementRef::simple("sb1", "e1", 1), None);
        let storage = session.storage().clone();
        clock.advance_secs(12);
        let peeked = RoutineSession::peek(strength(), RoutineKind::Base, storage, clock.clone());
        assert_eq!(peeked.elapsed_secs(), 12);
        assert_eq!(peeked.completion().len(), 1);
        assert_eq!(peeked.rest_snapshot().unwrap().time_left_secs, 18);
    }

    #[test]
    fn test_switching_routine_drops_old_rest() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        session.toggle(&ElementRef::simple("sb1", "e1", 1), None);
        assert!(session.is_resting());

        session.replace_routine(Routine {
            id: "r2".into(),
            ..strength()
        });
        assert!(!session.is_resting());
        assert!(session.rest_snapshot().is_none());
        assert!(session.storage().get(REST_END_KEY).unwrap().is_none());
        assert!(session.completion().is_empty());
        assert_eq!(session.completion().routine_id(), "r2");
        assert_eq!(session.active(), Some(&ElementRef::simple("sb1", "e1", 1)));
    }

    #[test]
    fn test_progress_for_block() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        session.toggle(&ElementRef::simple("core", "p", 1), None);

        let core = session.progress_for_block("b2").unwrap();
        assert_eq!(core.global_percent, 100);
        assert!(core.is_routine_completed());
        assert!(!session.is_routine_completed());
        assert!(session.progress_for_block("missing").is_none());
    }

    #[test]
    fn test_replace_routine_retargets() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        session.toggle(&ElementRef::simple("sb1", "e1", 1), None);
        session.skip_rest();
        assert_eq!(session.active(), Some(&ElementRef::simple("sb1", "e1", 2)));

        let mut smaller = strength();
        smaller.blocks[0].sub_blocks[0].exercises[0].series.truncate(1);
        session.replace_routine(smaller);

        assert_eq!(session.sequence().len(), 4);
        assert_eq!(session.active(), Some(&ElementRef::superset_round("ss", "a", 1)));
        assert!(session.completion().is_completed(&ElementRef::simple("sb1", "e1", 1)));
    }

    fn saved_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.import_routine(
            &RawRoutine {
                id: "r1".into(),
                nombre: "Fuerza".into(),
                ..Default::default()
            },
            RoutineKind::Base,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_finish_clears_local_state() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        session.toggle(&ElementRef::simple("sb1", "e1", 1), input(8, "40"));
        clock.advance_secs(600);

        let db = saved_db();
        let saved = session.finish(&db, "alumno-1").unwrap();
        assert_eq!(saved.series_count, 1);
        assert!(session.completion().is_empty());
        assert!(session.active().is_none());
        assert!(!session.is_resting());
        assert!(session.storage().is_empty());

        let last = db.fetch_last_session("r1", RoutineKind::Base, "alumno-1").unwrap().unwrap();
        assert_eq!(last.series[0].exercise_id, "ex-1");
        assert_eq!(last.series[0].load_performed, "40");
    }

    struct BrokenStore;

    impl DataStore for BrokenStore {
        fn fetch_routine(&self, _: &str, _: RoutineKind) -> anyhow::Result<RawRoutine> {
            anyhow::bail!("offline")
        }

        fn fetch_last_session(&self, _: &str, _: RoutineKind, _: &str) -> anyhow::Result<Option<LastSession>> {
            anyhow::bail!("offline")
        }

        fn insert_session(&self, _: &NewSession) -> anyhow::Result<i64> {
            Ok(9)
        }

        fn insert_series_performed(&self, _: &[SeriesPerformed]) -> anyhow::Result<()> {
            anyhow::bail!("offline")
        }

        fn delete_session(&self, _: i64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_finish_keeps_progress() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        let set1 = ElementRef::simple("sb1", "e1", 1);
        session.toggle(&set1, None);

        assert!(session.finish(&BrokenStore, "alumno-1").is_err());
        assert!(session.completion().is_completed(&set1));
        assert!(session.is_resting());
        assert!(session.storage().get(REST_END_KEY).unwrap().is_some());
        assert!(session.storage().get("workout-progress-r1").unwrap().is_some());
    }

    #[test]
    fn test_load_last_session_error_maps_to_fetch_error() {
        let clock = ManualClock::new(0);
        let mut session = open(MemoryStorage::new(), &clock);
        let err = session.load_last_session(&BrokenStore, "alumno-1").unwrap_err();
        assert_eq!(err.routine_id, "r1");
    }
}
