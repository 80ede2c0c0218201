//! Completion store - which elements are done, persisted per routine
//!
//! Stored under `workout-progress-<routineId>` as a JSON object keyed by
//! element id. Values are either a detail object or the bare `true` older
//! builds wrote. The session start under `workout-session-<routineId>`
//! expires the whole map after 12 hours.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::routine::{ElementKind, ElementRef, ExecutionType};
use crate::storage::{KeyValueStore, progress_key, remove_or_log, session_key, write_or_log};

/// Progress older than this is discarded on load
pub const SESSION_TIMEOUT_MS: i64 = 12 * 60 * 60 * 1000;

/// What the user actually did on a completed element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionDetail {
    #[serde(rename = "tipoElemento")]
    pub element_kind: ElementKind,
    #[serde(rename = "pausa", default, skip_serializing_if = "Option::is_none")]
    pub pause_secs: Option<u32>,
    #[serde(rename = "subbloqueId", default, skip_serializing_if = "Option::is_none")]
    pub sub_block_id: Option<String>,
    #[serde(rename = "actualCarga", default, skip_serializing_if = "Option::is_none")]
    pub actual_load: Option<String>,
    #[serde(rename = "tipoEjecucion", default, skip_serializing_if = "Option::is_none")]
    pub execution_type: Option<ExecutionType>,
    #[serde(rename = "actualReps", default, skip_serializing_if = "Option::is_none")]
    pub actual_reps: Option<u32>,
    #[serde(rename = "actualDuracion", default, skip_serializing_if = "Option::is_none")]
    pub actual_duration_secs: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Completion {
    Flag(bool),
    Detail(CompletionDetail),
}

impl Completion {
    pub fn is_done(&self) -> bool {
        !matches!(self, Completion::Flag(false))
    }

    pub fn detail(&self) -> Option<&CompletionDetail> {
        match self {
            Completion::Detail(d) => Some(d),
            Completion::Flag(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionStore {
    routine_id: String,
    session_started_ms: Option<i64>,
    entries: BTreeMap<ElementRef, Completion>,
}

impl CompletionStore {
    pub fn new(routine_id: &str) -> Self {
        Self {
            routine_id: routine_id.to_string(),
            session_started_ms: None,
            entries: BTreeMap::new(),
        }
    }

    /// Restore progress for a routine, dropping it if the session timed out
    pub fn load(storage: &mut dyn KeyValueStore, routine_id: &str, now_ms: i64) -> Self {
        let mut store = Self::new(routine_id);
        let session = session_key(routine_id);
        let progress = progress_key(routine_id);

        let session_started = read(storage, &session).and_then(|v| v.parse::<i64>().ok());
        if let Some(started) = session_started
            && now_ms - started > SESSION_TIMEOUT_MS
        {
            info!("Session for routine {} expired, discarding progress", routine_id);
            remove_or_log(storage, &session);
            remove_or_log(storage, &progress);
            return store;
        }
        store.session_started_ms = session_started;

        let Some(raw) = read(storage, &progress) else {
            return store;
        };

        let parsed: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!("Unreadable progress for routine {}: {}", routine_id, e);
                return store;
            }
        };

        for (id, value) in parsed {
            let completion = match serde_json::from_value::<Completion>(value) {
                Ok(c) if c.is_done() => c,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping stored value for {}: {}", id, e);
                    continue;
                }
            };
            match ElementRef::decode(&id) {
                Ok(element) => {
                    store.entries.insert(element, completion);
                }
                Err(e) => warn!("Skipping stored element: {}", e),
            }
        }

        debug!("Restored {} completed elements for {}", store.entries.len(), routine_id);
        store
    }

    pub fn routine_id(&self) -> &str {
        &self.routine_id
    }

    pub fn session_started_ms(&self) -> Option<i64> {
        self.session_started_ms
    }

    pub fn is_completed(&self, element: &ElementRef) -> bool {
        self.entries.contains_key(element)
    }

    pub fn get(&self, element: &ElementRef) -> Option<&Completion> {
        self.entries.get(element)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ElementRef, &Completion)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flip one element. Returns the new completion state.
    ///
    /// Completing attaches `detail` (or a bare flag); un-completing drops it.
    pub fn toggle(
        &mut self,
        storage: &mut dyn KeyValueStore,
        now_ms: i64,
        element: &ElementRef,
        detail: Option<CompletionDetail>,
    ) -> bool {
        let completed = if self.entries.remove(element).is_some() {
            false
        } else {
            self.entries.insert(element.clone(), to_completion(detail));
            true
        };
        self.persist(storage, now_ms);
        completed
    }

    /// Flip a set of elements together: all become done unless all already are.
    pub fn toggle_group(
        &mut self,
        storage: &mut dyn KeyValueStore,
        now_ms: i64,
        elements: &[ElementRef],
        mut detail_for: impl FnMut(&ElementRef) -> Option<CompletionDetail>,
    ) -> bool {
        let all_done = !elements.is_empty() && elements.iter().all(|el| self.is_completed(el));

        if all_done {
            for el in elements {
                self.entries.remove(el);
            }
        } else {
            for el in elements {
                if !self.entries.contains_key(el) {
                    let completion = to_completion(detail_for(el));
                    self.entries.insert(el.clone(), completion);
                }
            }
        }

        self.persist(storage, now_ms);
        !all_done
    }

    /// Forget everything for this routine, in memory and on disk
    pub fn clear(&mut self, storage: &mut dyn KeyValueStore) {
        self.entries.clear();
        self.session_started_ms = None;
        remove_or_log(storage, &session_key(&self.routine_id));
        remove_or_log(storage, &progress_key(&self.routine_id));
    }

    fn persist(&mut self, storage: &mut dyn KeyValueStore, now_ms: i64) {
        if self.session_started_ms.is_none() {
            self.session_started_ms = Some(now_ms);
            write_or_log(storage, &session_key(&self.routine_id), &now_ms.to_string());
        }

        let encoded: BTreeMap<String, &Completion> =
            self.entries.iter().map(|(el, c)| (el.encode(), c)).collect();
        match serde_json::to_string(&encoded) {
            Ok(json) => write_or_log(storage, &progress_key(&self.routine_id), &json),
            Err(e) => warn!("Failed to encode progress: {}", e),
        }
    }
}

fn to_completion(detail: Option<CompletionDetail>) -> Completion {
    detail.map(Completion::Detail).unwrap_or(Completion::Flag(true))
}

fn read(storage: &dyn KeyValueStore, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to read {}: {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn detail(reps: u32) -> CompletionDetail {
        CompletionDetail {
            element_kind: ElementKind::Simple,
            pause_secs: Some(60),
            sub_block_id: Some("sb1".into()),
            actual_load: Some("20".into()),
            execution_type: Some(ExecutionType::Standard),
            actual_reps: Some(reps),
            actual_duration_secs: None,
        }
    }

    #[test]
    fn test_toggle_persists_every_change() {
        let mut storage = MemoryStorage::new();
        let mut store = CompletionStore::new("r1");
        let el = ElementRef::simple("sb1", "ex1", 1);

        assert!(store.toggle(&mut storage, 1_000, &el, Some(detail(10))));
        let raw = storage.get("workout-progress-r1").unwrap().unwrap();
        assert!(raw.contains("simple/sb1/ex1/set1"));
        assert!(raw.contains("\"actualReps\":10"));
        assert_eq!(storage.get("workout-session-r1").unwrap().as_deref(), Some("1000"));

        let reloaded = CompletionStore::load(&mut storage, "r1", 2_000);
        assert_eq!(reloaded.get(&el), Some(&Completion::Detail(detail(10))));
    }

    #[test]
    fn test_untoggle_drops_detail() {
        let mut storage = MemoryStorage::new();
        let mut store = CompletionStore::new("r1");
        let el = ElementRef::simple("sb1", "ex1", 1);

        store.toggle(&mut storage, 0, &el, Some(detail(10)));
        assert!(!store.toggle(&mut storage, 0, &el, Some(detail(99))));
        assert!(!store.is_completed(&el));
        assert_eq!(storage.get("workout-progress-r1").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_toggle_twice_back_to_same_membership() {
        let mut storage = MemoryStorage::new();
        let mut store = CompletionStore::new("r1");
        let a = ElementRef::simple("sb1", "ex1", 1);
        let b = ElementRef::simple("sb1", "ex1", 2);
        store.toggle(&mut storage, 0, &a, Some(detail(10)));
        let before: Vec<_> = store.iter().map(|(el, _)| el.clone()).collect();

        store.toggle(&mut storage, 0, &b, None);
        store.toggle(&mut storage, 0, &b, None);
        store.toggle(&mut storage, 0, &a, None);
        store.toggle(&mut storage, 0, &a, Some(detail(12)));

        let after: Vec<_> = store.iter().map(|(el, _)| el.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_load_legacy_values() {
        let mut storage = MemoryStorage::new();
        storage
            .set(
                "workout-progress-r1",
                r#"{"simple-sb1-ex1-set1": true, "simple-sb1-ex1-set2": false,
                    "simple-a-b-c-set1": true, "superset/ss/a/round1": {"tipoElemento":"superset"},
                    "simple/sb1/ex1/set3": {"actualReps": 4}}"#,
            )
            .unwrap();

        let store = CompletionStore::load(&mut storage, "r1", 0);
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get(&ElementRef::simple("sb1", "ex1", 1)),
            Some(&Completion::Flag(true))
        );
        let superset = store.get(&ElementRef::superset_round("ss", "a", 1)).unwrap();
        assert_eq!(superset.detail().unwrap().element_kind, ElementKind::Superset);
    }

    #[test]
    fn test_load_corrupt_json_is_empty() {
        let mut storage = MemoryStorage::new();
        storage.set("workout-progress-r1", "{not json").unwrap();
        assert!(CompletionStore::load(&mut storage, "r1", 0).is_empty());
    }

    #[test]
    fn test_timeout_boundary() {
        let el = ElementRef::simple("sb1", "ex1", 1);
        let seeded = |storage: &mut MemoryStorage| {
            let mut store = CompletionStore::new("r1");
            store.toggle(storage, 0, &el, None);
        };

        // just under 12h keeps progress
        let mut storage = MemoryStorage::new();
        seeded(&mut storage);
        let store = CompletionStore::load(&mut storage, "r1", 12 * HOUR_MS - 1);
        assert!(store.is_completed(&el));

        // exactly 12h still keeps it
        let store = CompletionStore::load(&mut storage, "r1", 12 * HOUR_MS);
        assert!(store.is_completed(&el));

        // just over evicts and discards both keys
        let store = CompletionStore::load(&mut storage, "r1", 12 * HOUR_MS + 1);
        assert!(store.is_empty());
        assert!(storage.get("workout-session-r1").unwrap().is_none());
        assert!(storage.get("workout-progress-r1").unwrap().is_none());
    }

    #[test]
    fn test_toggle_group_all_or_nothing() {
        let mut storage = MemoryStorage::new();
        let mut store = CompletionStore::new("r1");
        let round = vec![
            ElementRef::superset_round("ss", "a", 1),
            ElementRef::superset_round("ss", "b", 1),
        ];

        store.toggle(&mut storage, 0, &round[0], Some(detail(5)));
        assert!(store.toggle_group(&mut storage, 0, &round, |_| None));
        assert!(round.iter().all(|el| store.is_completed(el)));
        // existing detail is kept
        assert!(store.get(&round[0]).unwrap().detail().is_some());

        assert!(!store.toggle_group(&mut storage, 0, &round, |_| None));
        assert!(store.is_empty());
    }

    #[test]
    fn test_write_failure_keeps_memory_state() {
        let mut storage = MemoryStorage::new();
        storage.set_read_only(true);
        let mut store = CompletionStore::new("r1");
        let el = ElementRef::simple("sb1", "ex1", 1);

        assert!(store.toggle(&mut storage, 0, &el, None));
        assert!(store.is_completed(&el));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_clear_removes_keys() {
        let mut storage = MemoryStorage::new();
        let mut store = CompletionStore::new("r1");
        store.toggle(&mut storage, 0, &ElementRef::simple("a", "b", 1), None);
        store.clear(&mut storage);
        assert!(store.is_empty());
        assert!(storage.is_empty());
    }
}
