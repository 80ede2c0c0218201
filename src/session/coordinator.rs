//! Active element and rest timer coordination
//!
//! Two phases: idle with an optional active element, or resting until an
//! absolute end time. Completing an element may start a rest; the rest
//! ending (or being skipped) moves the active element to whatever follows
//! the element that started it. At most one rest runs at a time.

use tracing::{debug, info};

use crate::notify::{Notifier, REST_ELAPSED_PATTERN};
use crate::progress::CompletionStore;
use crate::routine::{ElementRef, ElementSequence, Routine};
use crate::storage::KeyValueStore;

use super::clock::{RestClock, RestSnapshot, RestTimerState};

/// Shown as "next" when nothing follows
pub const ROUTINE_COMPLETE_LABEL: &str = "¡Rutina Completada!";

/// Read-only view of the session the coordinator decides on
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    pub routine: &'a Routine,
    pub sequence: &'a ElementSequence,
    pub completion: &'a CompletionStore,
}

impl SessionView<'_> {
    /// Pause owed after completing `element`, given the completion map as it
    /// is *after* the toggle.
    ///
    /// Simple sets use their own pause. A superset element only owes the
    /// round's pause when it was the last of its round to be completed.
    pub fn pause_after(&self, element: &ElementRef) -> u32 {
        match element {
            ElementRef::Simple { .. } => self
                .routine
                .resolve(element)
                .map(|r| r.pause_secs())
                .unwrap_or(0),
            ElementRef::SupersetRound { sub_block_id, round, .. } => {
                let Some(sub_block) = self.routine.find_sub_block(sub_block_id) else {
                    return 0;
                };
                let round_done = sub_block
                    .round_elements(*round)
                    .iter()
                    .all(|el| self.completion.is_completed(el));
                if round_done { sub_block.round_pause_secs(*round) } else { 0 }
            }
        }
    }

    fn name_of(&self, element: &ElementRef) -> Option<String> {
        self.routine
            .resolve(element)
            .map(|r| r.exercise_name().to_string())
    }

    /// First incomplete element after `element`, else whatever is still
    /// open earlier in the routine
    pub fn next_actionable(&self, element: &ElementRef) -> Option<ElementRef> {
        self.sequence
            .first_after_where(element, |el| !self.completion.is_completed(el))
            .cloned()
            .or_else(|| self.initial_active())
    }

    /// Warm-up work first, then the first incomplete element overall
    pub fn initial_active(&self) -> Option<ElementRef> {
        let incomplete = |el: &ElementRef| !self.completion.is_completed(el);
        let in_warm_up = |el: &ElementRef| {
            self.routine
                .find_sub_block(el.sub_block_id())
                .is_some_and(|sb| sb.is_warm_up())
        };

        self.sequence
            .first_where(|el| in_warm_up(el) && incomplete(el))
            .or_else(|| self.sequence.first_where(incomplete))
            .cloned()
    }
}

/// What a coordinator step did, for the presentation layer to react to
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    RestStarted {
        end_ms: i64,
        duration_secs: u32,
        next_name: String,
    },
    /// Active element moved on; `None` once the last element is done
    Advanced { active: Option<ElementRef> },
    /// An element was un-completed and is active again
    Revisit { active: ElementRef },
    RestFinished { active: Option<ElementRef> },
}

#[derive(Debug, Default, Clone)]
pub struct Coordinator {
    active: Option<ElementRef>,
    rest: RestClock,
}

impl Coordinator {
    /// Rebuild coordinator state after a (re)load.
    ///
    /// A persisted rest still running is resumed. One that ran out while the
    /// app was away is finished right here, with a vibration.
    pub fn resume(
        view: &SessionView<'_>,
        storage: &mut dyn KeyValueStore,
        now_ms: i64,
        notifier: &dyn Notifier,
    ) -> (Self, Option<Transition>) {
        let mut coordinator = Self {
            active: view.initial_active(),
            rest: RestClock::restore(storage),
        };

        let elapsed = coordinator
            .rest
            .state()
            .is_some_and(|state| state.has_elapsed(now_ms));
        if !elapsed {
            return (coordinator, None);
        }

        info!("Rest ended while inactive");
        notifier.vibrate(REST_ELAPSED_PATTERN);
        let transition = coordinator.finish_rest(view, storage);
        (coordinator, Some(transition))
    }

    pub fn active(&self) -> Option<&ElementRef> {
        self.active.as_ref()
    }

    pub fn is_resting(&self) -> bool {
        self.rest.is_running()
    }

    pub fn rest_state(&self) -> Option<&RestTimerState> {
        self.rest.state()
    }

    pub fn rest_snapshot(&self, now_ms: i64) -> Option<RestSnapshot> {
        self.rest.snapshot(now_ms)
    }

    /// `element` just went from not done to done
    pub fn on_completed(
        &mut self,
        view: &SessionView<'_>,
        storage: &mut dyn KeyValueStore,
        now_ms: i64,
        element: &ElementRef,
    ) -> Transition {
        if view.sequence.is_last(element) {
            self.active = None;
            info!("Last element completed");
            return Transition::Advanced { active: None };
        }

        let pause = view.pause_after(element);
        if pause > 0 && !self.rest.is_running() {
            let next_name = view
                .next_actionable(element)
                .and_then(|next| view.name_of(&next))
                .unwrap_or_else(|| ROUTINE_COMPLETE_LABEL.to_string());
            let state = self.rest.start(storage, now_ms, pause, &next_name, element);
            return Transition::RestStarted {
                end_ms: state.end_ms,
                duration_secs: pause,
                next_name,
            };
        }

        self.active = view.next_actionable(element);
        debug!("Active element -> {:?}", self.active);
        Transition::Advanced {
            active: self.active.clone(),
        }
    }

    /// `element` was un-completed: the user is revisiting it
    pub fn on_uncompleted(&mut self, element: &ElementRef) -> Transition {
        self.active = Some(element.clone());
        Transition::Revisit {
            active: element.clone(),
        }
    }

    /// Finish the rest if its end time has passed
    pub fn tick(
        &mut self,
        view: &SessionView<'_>,
        storage: &mut dyn KeyValueStore,
        now_ms: i64,
    ) -> Option<Transition> {
        let elapsed = self.rest.state().is_some_and(|s| s.has_elapsed(now_ms));
        elapsed.then(|| self.finish_rest(view, storage))
    }

    /// End the current rest early. `None` when not resting.
    pub fn skip_rest(
        &mut self,
        view: &SessionView<'_>,
        storage: &mut dyn KeyValueStore,
    ) -> Option<Transition> {
        if !self.rest.is_running() {
            return None;
        }
        info!("Rest skipped");
        Some(self.finish_rest(view, storage))
    }

    /// Drop any rest and forget the active element (after a saved session)
    pub fn reset(&mut self, storage: &mut dyn KeyValueStore) {
        self.active = None;
        self.rest.stop(storage);
    }

    /// Keep the active element valid after the routine tree changed
    pub fn retarget(&mut self, view: &SessionView<'_>) {
        let still_valid = self.active.as_ref().is_some_and(|el| view.sequence.contains(el));
        if !still_valid {
            self.active = view.initial_active();
        }
    }

    /// Next element is looked up again from the origin, so completions made
    /// during the rest are taken into account.
    fn finish_rest(&mut self, view: &SessionView<'_>, storage: &mut dyn KeyValueStore) -> Transition {
        let origin = self.rest.stop(storage).and_then(|state| state.origin);

        self.active = match origin {
            Some(origin) if view.sequence.contains(&origin) => view.next_actionable(&origin),
            _ => view.initial_active(),
        };
        debug!("Rest finished, active element -> {:?}", self.active);
        Transition::RestFinished {
            active: self.active.clone(),
        }
    }
}
