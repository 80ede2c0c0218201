//! Routine loader - one fetch per (routine, kind) at a time
//!
//! A second caller asking for a routine that is already being fetched waits
//! for that fetch instead of issuing its own. The entry is dropped once the
//! fetch settles, so later loads (and retries after errors) hit the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::routine::{Routine, RoutineKind};

use super::DataStore;

type Key = (String, RoutineKind);
type InFlight = Arc<OnceCell<Result<Routine, FetchError>>>;

pub struct RoutineLoader<D> {
    store: Arc<Mutex<D>>,
    in_flight: Mutex<HashMap<Key, InFlight>>,
}

impl<D: DataStore + Send + 'static> RoutineLoader<D> {
    pub fn new(store: Arc<Mutex<D>>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(&self, routine_id: &str, kind: RoutineKind) -> Result<Routine, FetchError> {
        let key = (routine_id.to_string(), kind);

        let cell = {
            let mut in_flight = self.lock_in_flight();
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };

        let result = cell.get_or_init(|| self.fetch(routine_id, kind)).await.clone();

        let mut in_flight = self.lock_in_flight();
        if in_flight.get(&key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            in_flight.remove(&key);
        }

        result
    }

    async fn fetch(&self, routine_id: &str, kind: RoutineKind) -> Result<Routine, FetchError> {
        debug!("Fetching routine {} ({})", routine_id, kind);
        let store = Arc::clone(&self.store);
        let id = routine_id.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            let store = store
                .lock()
                .map_err(|_| anyhow::anyhow!("data store lock poisoned"))?;
            store.fetch_routine(&id, kind)
        })
        .await;

        match joined {
            Ok(Ok(raw)) => Ok(Routine::from_raw(raw)),
            Ok(Err(e)) => {
                warn!("Routine fetch failed: {}", e);
                Err(FetchError::new(routine_id, e))
            }
            Err(e) => Err(FetchError::new(routine_id, e)),
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<Key, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{LastSession, NewSession, SeriesPerformed};
    use crate::routine::RawRoutine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingStore {
        fetches: Arc<AtomicUsize>,
        fail: bool,
    }

    impl DataStore for CountingStore {
        fn fetch_routine(&self, routine_id: &str, _kind: RoutineKind) -> anyhow::Result<RawRoutine> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            if self.fail {
                anyhow::bail!("network down");
            }
            Ok(RawRoutine {
                id: routine_id.to_string(),
                nombre: "Fuerza".into(),
                ..Default::default()
            })
        }

        fn fetch_last_session(&self, _: &str, _: RoutineKind, _: &str) -> anyhow::Result<Option<LastSession>> {
            Ok(None)
        }

        fn insert_session(&self, _: &NewSession) -> anyhow::Result<i64> {
            Ok(1)
        }

        fn insert_series_performed(&self, _: &[SeriesPerformed]) -> anyhow::Result<()> {
            Ok(())
        }

        fn delete_session(&self, _: i64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn loader(fail: bool) -> (RoutineLoader<CountingStore>, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let store = CountingStore {
            fetches: Arc::clone(&fetches),
            fail,
        };
        (RoutineLoader::new(Arc::new(Mutex::new(store))), fetches)
    }

    #[tokio::test]
    async fn test_concurrent_loads_are_coalesced() {
        let (loader, fetches) = loader(false);

        let (a, b) = tokio::join!(
            loader.load("r1", RoutineKind::Base),
            loader.load("r1", RoutineKind::Base)
        );
        assert_eq!(a.unwrap().name, "Fuerza");
        assert_eq!(b.unwrap().id, "r1");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_kinds_fetch_separately() {
        let (loader, fetches) = loader(false);
        let (a, b) = tokio::join!(
            loader.load("r1", RoutineKind::Base),
            loader.load("r1", RoutineKind::Personalizada)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_settled_fetch_is_not_cached() {
        let (loader, fetches) = loader(false);
        loader.load("r1", RoutineKind::Base).await.unwrap();
        loader.load("r1", RoutineKind::Base).await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared_then_retryable() {
        let (loader, fetches) = loader(true);
        let (a, b) = tokio::join!(
            loader.load("r1", RoutineKind::Base),
            loader.load("r1", RoutineKind::Base)
        );
        let err = a.unwrap_err();
        assert!(err.reason.contains("network down"));
        assert_eq!(err.user_message(), "No se pudo cargar la rutina");
        assert!(b.is_err());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        assert!(loader.load("r1", RoutineKind::Base).await.is_err());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
