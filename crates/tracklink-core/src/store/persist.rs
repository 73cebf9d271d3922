// ── Durable state ──
//
// One flat JSON record per account: grace bookkeeping plus every cached
// snapshot. Both halves are written together, so a reader never sees a
// cache from one cycle paired with grace state from another.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PersistError;
use crate::grace::{GraceMode, GraceState};
use crate::model::{DeviceId, DeviceSnapshot};

/// The persisted record. Missing or unknown fields load as defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub grace_mode: GraceMode,
    pub first_failure_time: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub last_success_time: Option<DateTime<Utc>>,
    pub snapshots: BTreeMap<DeviceId, DeviceSnapshot>,
}

impl PersistedState {
    pub fn new(grace: &GraceState, snapshots: &BTreeMap<DeviceId, Arc<DeviceSnapshot>>) -> Self {
        Self {
            grace_mode: grace.mode,
            first_failure_time: grace.first_failure_time,
            failure_count: grace.failure_count,
            last_success_time: grace.last_success_time,
            snapshots: snapshots
                .iter()
                .map(|(id, snap)| (*id, DeviceSnapshot::clone(snap)))
                .collect(),
        }
    }

    /// Grace bookkeeping, repaired if the stored fields contradict each other.
    pub fn grace(&self) -> GraceState {
        GraceState {
            mode: self.grace_mode,
            first_failure_time: self.first_failure_time,
            failure_count: self.failure_count,
            last_success_time: self.last_success_time,
        }
        .normalized()
    }

    /// Snapshots keyed by id; the map key is authoritative for each id.
    pub fn into_snapshots(self) -> BTreeMap<DeviceId, Arc<DeviceSnapshot>> {
        self.snapshots
            .into_iter()
            .map(|(id, mut snap)| {
                snap.id = id;
                (id, Arc::new(snap))
            })
            .collect()
    }
}

/// Where the persisted record lives.
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<PersistedState>, PersistError>;

    fn save(&self, state: &PersistedState) -> Result<(), PersistError>;
}

// ── File store ──────────────────────────────────────────────────────

/// JSON file replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<PersistedState>, PersistError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| PersistError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        let encoded = serde_json::to_vec_pretty(state).map_err(PersistError::Encode)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&encoded).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        debug!(path = %self.path.display(), bytes = encoded.len(), "state saved");
        Ok(())
    }
}

// ── Memory store ────────────────────────────────────────────────────

/// Keeps the record in memory. For tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// The last saved record.
    pub fn current(&self) -> Option<PersistedState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<PersistedState>, PersistError> {
        Ok(self.current())
    }

    fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }
}
