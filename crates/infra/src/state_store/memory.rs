//! In-memory state store (tests/dev).

use std::sync::Mutex;

use recalc_core::{ExpectedRevision, JobState};

use super::{check_revision, StateStore, StateStoreError, StoredState};

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Option<StoredState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a state at revision 1.
    pub fn with_state(state: JobState) -> Self {
        Self {
            inner: Mutex::new(Some(StoredState { revision: 1, state })),
        }
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self) -> Result<Option<StoredState>, StateStoreError> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| StateStoreError::Backend("state lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn store(&self, expected: ExpectedRevision, state: &JobState) -> Result<u64, StateStoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StateStoreError::Backend("state lock poisoned".to_string()))?;

        let current = guard.as_ref().map_or(0, |s| s.revision);
        check_revision(expected, current)?;

        let revision = current + 1;
        *guard = Some(StoredState {
            revision,
            state: state.clone(),
        });
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn missing_record_is_revision_zero() {
        let store = InMemoryStateStore::new();
        assert!(store.load().unwrap().is_none());

        let state = JobState::started(10, 5, Utc::now()).unwrap();
        assert!(store.store(ExpectedRevision::Exact(1), &state).is_err());
        assert_eq!(store.store(ExpectedRevision::Exact(0), &state).unwrap(), 1);
        assert_eq!(store.load().unwrap().unwrap().state, state);
    }

    #[test]
    fn stale_revision_conflicts() {
        let store = InMemoryStateStore::with_state(JobState::idle(200));
        let running = JobState::started(10, 5, Utc::now()).unwrap();

        assert_eq!(store.store(ExpectedRevision::Exact(1), &running).unwrap(), 2);
        let err = store
            .store(ExpectedRevision::Exact(1), &JobState::idle(200))
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.load().unwrap().unwrap().state.is_running());
    }

    #[test]
    fn any_overwrites_unconditionally() {
        let store = InMemoryStateStore::with_state(JobState::idle(200));
        assert_eq!(store.store(ExpectedRevision::Any, &JobState::idle(50)).unwrap(), 2);
        assert_eq!(store.load().unwrap().unwrap().state.batch_size, 50);
    }
}
