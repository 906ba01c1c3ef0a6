//! Synchronized State Store
//!
//! Holds the shared [`SyncState`] document, persists it after every write
//! batch and publishes each new version to subscribers. All writes go through
//! the dispatcher under one lock, so a client always sees its own writes in
//! order. Other clients on the same storage converge through
//! [`SyncStore::reconcile`].

use crate::domain::dispatcher;
use crate::domain::errors::IngestError;
use crate::domain::models::{Action, SyncState};
use crate::domain::settings::DispatchSettings;
use crate::infrastructure::storage::DocumentStorage;
use anyhow::{Context, Result};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Result of [`SyncStore::apply_batch`]
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub state: SyncState,
    pub applied: usize,
    pub skipped: Vec<IngestError>,
}

#[derive(Clone)]
pub struct SyncStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: RwLock<SyncState>,
    storage: Arc<dyn DocumentStorage>,
    key: String,
    settings: DispatchSettings,
    changes: broadcast::Sender<SyncState>,
}

impl SyncStore {
    /// Load the document stored under `key`, or create the default one
    pub fn open(
        storage: Arc<dyn DocumentStorage>,
        key: impl Into<String>,
        settings: DispatchSettings,
    ) -> Result<Self> {
        let key = key.into();
        let stored = storage
            .load(&key)
            .with_context(|| format!("Failed to load synchronized state '{}'", key))?;

        let (state, needs_flush) = match stored {
            Some(json) => match parse_document(&json) {
                Ok((state, normalized)) => (state, normalized),
                Err(e) => {
                    warn!(key = %key, "stored state unreadable, starting from defaults: {:#}", e);
                    (SyncState::default(), true)
                }
            },
            None => (SyncState::default(), true),
        };

        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        let store = Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(state),
                storage,
                key,
                settings,
                changes,
            }),
        };

        if needs_flush {
            let state = store.write();
            store.flush(&state);
        }

        info!(key = %store.inner.key, time = store.snapshot().time, "synchronized state opened");
        Ok(store)
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.inner.settings
    }

    pub fn snapshot(&self) -> SyncState {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Receive every new version of the document
    pub fn subscribe(&self) -> broadcast::Receiver<SyncState> {
        self.inner.changes.subscribe()
    }

    /// Dispatch one action, flush, publish
    pub fn apply(&self, action: &Action) -> Result<SyncState, IngestError> {
        let mut state = self.write();
        let next = dispatcher::apply(action, &state, &self.inner.settings)?;
        *state = next.clone();

        debug!(%action, time = next.time, "action applied");
        self.flush(&state);
        self.publish(&state);
        Ok(next)
    }

    /// Dispatch several actions in order with a single flush at the end.
    ///
    /// No-op actions are skipped and reported; the rest still apply.
    pub fn apply_batch(&self, actions: &[Action]) -> BatchResult {
        let mut state = self.write();
        let mut applied = 0;
        let mut skipped = Vec::new();

        for action in actions {
            match dispatcher::apply(action, &state, &self.inner.settings) {
                Ok(next) => {
                    *state = next;
                    applied += 1;
                }
                Err(e) => skipped.push(e),
            }
        }

        if applied > 0 {
            self.flush(&state);
            self.publish(&state);
        }

        BatchResult {
            state: state.clone(),
            applied,
            skipped,
        }
    }

    /// Replace the whole document with the defaults
    pub fn reset(&self) -> SyncState {
        let mut state = self.write();
        *state = SyncState::default();
        info!(key = %self.inner.key, "synchronized state reset");
        self.flush(&state);
        self.publish(&state);
        state.clone()
    }

    /// Adopt the stored document if another client changed it.
    ///
    /// Load, compare and adopt happen under the write lock, so a local
    /// write can never slip in between and be overwritten. A stored document
    /// with an older clock is refused and overwritten with ours, unless it is
    /// the default document (cleared slot or a reset by another client).
    /// Returns true when the in-memory document changed.
    pub fn reconcile(&self) -> Result<bool> {
        let mut state = self.write();

        let stored = self
            .inner
            .storage
            .load(&self.inner.key)
            .with_context(|| format!("Failed to load synchronized state '{}'", self.inner.key))?;
        let incoming = match stored {
            Some(json) => parse_document(&json)?.0,
            None => SyncState::default(),
        };

        if *state == incoming {
            return Ok(false);
        }

        if incoming.time < state.time && incoming != SyncState::default() {
            debug!(
                stored = incoming.time,
                local = state.time,
                "stored state is older, keeping ours"
            );
            self.flush(&state);
            return Ok(false);
        }

        debug!(from = state.time, to = incoming.time, "adopting stored state");
        *state = incoming;
        self.publish(&state);
        Ok(true)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SyncState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, state: &SyncState) {
        let result = serde_json::to_string(state)
            .context("Failed to serialize synchronized state")
            .and_then(|json| self.inner.storage.save(&self.inner.key, &json));
        if let Err(e) = result {
            // The in-memory document stays authoritative for this client
            error!(key = %self.inner.key, "failed to persist synchronized state: {:#}", e);
        }
    }

    fn publish(&self, state: &SyncState) {
        // No subscribers is fine
        let _ = self.inner.changes.send(state.clone());
    }
}

fn parse_document(json: &str) -> Result<(SyncState, bool)> {
    let mut state: SyncState =
        serde_json::from_str(json).context("Failed to parse synchronized state")?;
    let normalized = state.normalize();
    Ok((state, normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Instrument;
    use crate::infrastructure::storage::{FileStorage, MemoryStorage};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Duration;

    const KEY: &str = "sync-state";

    fn open(storage: &MemoryStorage) -> SyncStore {
        SyncStore::open(Arc::new(storage.clone()), KEY, DispatchSettings::default()).unwrap()
    }

    #[test]
    fn test_open_creates_and_persists_default() {
        let storage = MemoryStorage::new();
        let store = open(&storage);
        assert_eq!(store.snapshot(), SyncState::default());
        assert!(storage.load(KEY).unwrap().is_some());
    }

    #[test]
    fn test_apply_persists_and_increments_time() {
        let storage = MemoryStorage::new();
        let store = open(&storage);

        let state = store
            .apply(&Action::SelectInstrument(Instrument::Cello))
            .unwrap();
        assert_eq!(state.time, 1);

        let stored: SyncState = serde_json::from_str(&storage.load(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored, state);

        let reopened = open(&storage);
        assert_eq!(reopened.snapshot().selected_instrument, Some(Instrument::Cello));
    }

    #[test]
    fn test_noop_leaves_document_untouched() {
        let storage = MemoryStorage::new();
        let store = open(&storage);
        let mut rx = store.subscribe();

        let result = store.apply(&Action::VolumeUp);
        assert!(matches!(result, Err(IngestError::DispatchNoop { .. })));
        assert_eq!(store.snapshot().time, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_subscribers_see_writes_in_order() {
        let storage = MemoryStorage::new();
        let store = open(&storage);
        let mut rx = store.subscribe();

        store
            .apply(&Action::SelectInstrument(Instrument::Viola))
            .unwrap();
        store.apply(&Action::VolumeDown).unwrap();
        store.apply(&Action::VolumeDown).unwrap();

        let times: Vec<u64> = (0..3).map(|_| rx.try_recv().unwrap().time).collect();
        assert_eq!(times, vec![1, 2, 3]);
    }

    #[test]
    fn test_batch_flushes_once_and_reports_skips() {
        let storage = MemoryStorage::new();
        let store = open(&storage);

        let result = store.apply_batch(&[
            Action::VolumeUp,
            Action::SelectInstrument(Instrument::All),
            Action::VolumeDown,
        ]);
        assert_eq!(result.applied, 2);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.state.time, 2);
        assert!(result
            .state
            .instruments
            .values()
            .all(|entry| entry.volume == 90));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let storage = MemoryStorage::new();
        let store = open(&storage);
        store
            .apply(&Action::SelectInstrument(Instrument::Violin1))
            .unwrap();
        store.apply(&Action::TogglePlay).unwrap();

        let state = store.reset();
        assert_eq!(state, SyncState::default());
        let reopened = open(&storage);
        assert_eq!(reopened.snapshot(), SyncState::default());
    }

    #[test]
    fn test_clients_converge_through_reconcile() {
        let storage = MemoryStorage::new();
        let first = open(&storage);
        let second = open(&storage);
        let mut rx = second.subscribe();

        first
            .apply(&Action::SelectInstrument(Instrument::Cello))
            .unwrap();
        assert_eq!(second.snapshot().selected_instrument, None);

        assert!(second.reconcile().unwrap());
        assert_eq!(second.snapshot().selected_instrument, Some(Instrument::Cello));
        assert_eq!(rx.try_recv().unwrap().time, 1);
        assert!(!second.reconcile().unwrap());

        storage.clear(KEY).unwrap();
        assert!(second.reconcile().unwrap());
        assert_eq!(second.snapshot(), SyncState::default());
    }

    #[test]
    fn test_reconcile_refuses_older_document() {
        let storage = MemoryStorage::new();
        let store = open(&storage);
        store
            .apply(&Action::SelectInstrument(Instrument::Viola))
            .unwrap();
        store.apply(&Action::VolumeDown).unwrap();

        let stale = SyncState {
            time: 1,
            selected_instrument: Some(Instrument::Cello),
            ..SyncState::default()
        };
        storage
            .save(KEY, &serde_json::to_string(&stale).unwrap())
            .unwrap();

        assert!(!store.reconcile().unwrap());
        assert_eq!(store.snapshot().time, 2);
        let stored: SyncState = serde_json::from_str(&storage.load(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored, store.snapshot());
    }

    #[test]
    fn test_reconcile_adopts_reset_from_another_client() {
        let storage = MemoryStorage::new();
        let first = open(&storage);
        let second = open(&storage);
        first
            .apply(&Action::SelectInstrument(Instrument::Cello))
            .unwrap();
        assert!(second.reconcile().unwrap());

        second.reset();
        assert!(first.reconcile().unwrap());
        assert_eq!(first.snapshot(), SyncState::default());
    }

    /// Storage whose next `load` blocks until released
    struct GatedStorage {
        inner: MemoryStorage,
        armed: AtomicBool,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl DocumentStorage for GatedStorage {
        fn load(&self, key: &str) -> Result<Option<String>> {
            let result = self.inner.load(key);
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            result
        }

        fn save(&self, key: &str, document: &str) -> Result<()> {
            self.inner.save(key, document)
        }

        fn clear(&self, key: &str) -> Result<()> {
            self.inner.clear(key)
        }
    }

    #[test]
    fn test_apply_during_reconcile_is_not_lost() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let storage = Arc::new(GatedStorage {
            inner: MemoryStorage::new(),
            armed: AtomicBool::new(false),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let store = SyncStore::open(storage.clone(), KEY, DispatchSettings::default()).unwrap();
        let mut rx = store.subscribe();

        storage.armed.store(true, Ordering::SeqCst);
        let reconciling = {
            let store = store.clone();
            thread::spawn(move || store.reconcile().unwrap())
        };
        entered_rx.recv().unwrap();

        let applying = {
            let store = store.clone();
            thread::spawn(move || {
                store
                    .apply(&Action::SelectInstrument(Instrument::Cello))
                    .unwrap()
            })
        };
        thread::sleep(Duration::from_millis(20));
        release_tx.send(()).unwrap();

        reconciling.join().unwrap();
        let applied = applying.join().unwrap();
        assert_eq!(applied.time, 1);

        let state = store.snapshot();
        assert_eq!(state.time, 1);
        assert_eq!(state.selected_instrument, Some(Instrument::Cello));

        let mut times = Vec::new();
        while let Ok(state) = rx.try_recv() {
            times.push(state.time);
        }
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "{:?}", times);
        assert_eq!(times.last(), Some(&1));

        let stored: SyncState =
            serde_json::from_str(&storage.load(KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored, state);
    }

    #[test]
    fn test_unreadable_document_falls_back_to_defaults() {
        let storage = MemoryStorage::new();
        storage.save(KEY, "not json").unwrap();
        let store = open(&storage);
        assert_eq!(store.snapshot(), SyncState::default());
        let stored = storage.load(KEY).unwrap().unwrap();
        assert!(serde_json::from_str::<SyncState>(&stored).is_ok());
    }

    #[test]
    fn test_partial_document_is_normalized() {
        let storage = MemoryStorage::new();
        storage
            .save(KEY, r#"{"time":7,"instrument":"all","instruments":{}}"#)
            .unwrap();
        let store = open(&storage);
        let state = store.snapshot();
        assert_eq!(state.time, 7);
        assert_eq!(state.selected_instrument, Some(Instrument::All));
        assert_eq!(state.instruments.len(), Instrument::all().len());
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn DocumentStorage> = Arc::new(FileStorage::new(dir.path()).unwrap());

        let store = SyncStore::open(storage.clone(), KEY, DispatchSettings::default()).unwrap();
        store
            .apply(&Action::SelectInstrument(Instrument::Violin2))
            .unwrap();
        store.apply(&Action::SpeedUp).unwrap();
        drop(store);

        let reopened = SyncStore::open(storage, KEY, DispatchSettings::default()).unwrap();
        let state = reopened.snapshot();
        assert_eq!(state.time, 2);
        assert!(state.instrument(Instrument::Violin2).unwrap().speed > 1.0);
    }
}
