//! JSON-file state store.
//!
//! The record survives process restarts. Writes go to a sibling temp file that
//! is synced and renamed over the target, so a crash never leaves a
//! half-written record. Revision checks are serialized within one process
//! only; use the Postgres store when several processes share the job.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use recalc_core::{ExpectedRevision, JobState};

use super::{check_revision, StateStore, StateStoreError, StoredState, STATE_KEY};

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    key: String,
    revision: u64,
    state: JobState,
}

#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    // Serializes read-check-write within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Option<Document>, StateStoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateStoreError::Io(e.to_string())),
        };

        let doc: Document = serde_json::from_slice(&bytes)
            .map_err(|e| StateStoreError::Serialization(e.to_string()))?;
        if doc.key != STATE_KEY {
            return Err(StateStoreError::Serialization(format!(
                "unexpected state key: {}",
                doc.key
            )));
        }
        Ok(Some(doc))
    }

    fn write_document(&self, doc: &Document) -> Result<(), StateStoreError> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| StateStoreError::Serialization(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StateStoreError::Io(e.to_string()))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp).map_err(|e| StateStoreError::Io(e.to_string()))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| StateStoreError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StateStoreError::Io(e.to_string()))
    }

    /// Revision of the current document, for a write that expects `expected`.
    ///
    /// An unconditional write replaces an unparseable document instead of
    /// failing on it, keeping the revision when the raw JSON still carries one.
    fn current_revision(&self, expected: ExpectedRevision) -> Result<u64, StateStoreError> {
        match self.read_document() {
            Ok(doc) => Ok(doc.map_or(0, |doc| doc.revision)),
            Err(StateStoreError::Serialization(reason)) if expected == ExpectedRevision::Any => {
                let revision = fs::read(&self.path)
                    .ok()
                    .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
                    .and_then(|raw| raw.get("revision").and_then(|r| r.as_u64()))
                    .unwrap_or(0);
                warn!(
                    path = %self.path.display(),
                    revision,
                    reason = %reason,
                    "unreadable job state overwritten"
                );
                Ok(revision)
            }
            Err(e) => Err(e),
        }
    }
}

impl StateStore for JsonFileStateStore {
    fn load(&self) -> Result<Option<StoredState>, StateStoreError> {
        Ok(self.read_document()?.map(|doc| StoredState {
            revision: doc.revision,
            state: doc.state,
        }))
    }

    fn store(&self, expected: ExpectedRevision, state: &JobState) -> Result<u64, StateStoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StateStoreError::Backend("state file lock poisoned".to_string()))?;

        let current = self.current_revision(expected)?;
        check_revision(expected, current)?;

        let doc = Document {
            key: STATE_KEY.to_string(),
            revision: current + 1,
            state: state.clone(),
        };
        self.write_document(&doc)?;

        debug!(path = %self.path.display(), revision = doc.revision, status = %state.status, "job state persisted");
        Ok(doc.revision)
    }
}
