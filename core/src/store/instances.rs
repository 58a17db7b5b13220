//! Persisted instance addressing state.
//!
//! Written as soon as an instance is provisioned so instances left behind
//! by a failed run can be found and deleted out of band, and completed at
//! job launch so a later process can resume monitoring. Removed on
//! teardown.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::PlaceholderContext;
use crate::error::ScanError;
use crate::rig::config::InstanceHandle;


/// Addressing of a provisioned instance and, once launched, everything
/// needed to pick up monitoring of its scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub handle: InstanceHandle,
    pub target: String,
    #[serde(default)]
    pub workspace: String,
    /// Resolved placeholder context.
    #[serde(default)]
    pub context: PlaceholderContext,
    #[serde(default)]
    pub task_name: String,
    /// Chunk file the scan consumes, removed after the scan finishes.
    #[serde(default)]
    pub chunk_file: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    /// Unset until the scan job is confirmed running.
    #[serde(default)]
    pub launched_at: Option<DateTime<Utc>>,
}

impl InstanceState {
    /// State of a freshly provisioned instance with no scan yet.
    pub fn provisioned(handle: &InstanceHandle, target: &str) -> Self {
        InstanceState {
            handle: handle.clone(),
            target: target.to_string(),
            workspace: String::new(),
            context: PlaceholderContext::new(),
            task_name: String::new(),
            chunk_file: None,
            created_at: Utc::now(),
            launched_at: None,
        }
    }

    pub fn is_launched(&self) -> bool {
        self.launched_at.is_some()
    }
}

/// One JSON file per instance under `<state_dir>/instances/`.
#[derive(Debug, Clone)]
pub struct InstanceStateStore {
    dir: PathBuf,
}

impl InstanceStateStore {
    pub fn new(state_dir: &Path) -> Self {
        InstanceStateStore {
            dir: state_dir.join("instances"),
        }
    }

    fn path(&self, id: &str) -> PathBuf {
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    pub fn save(&self, state: &InstanceState) -> Result<(), ScanError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(&state.handle.id);
        fs::write(&path, serde_json::to_string_pretty(state)?)?;
        debug!(instance = %state.handle.id, file = %path.display(), "saved instance state");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<InstanceState, ScanError> {
        let path = self.path(id);
        let content = fs::read_to_string(&path).map_err(|e| {
            ScanError::Config(format!("no saved state for instance '{}': {}", id, e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Remove the state of `id`. Missing state is not an error.
    pub fn remove(&self, id: &str) -> Result<(), ScanError> {
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable states, ordered by instance id.
    pub fn list(&self) -> Vec<InstanceState> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut states: Vec<InstanceState> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
            .filter_map(|p| {
                let parsed = fs::read_to_string(&p)
                    .map_err(|e| e.to_string())
                    .and_then(|c| serde_json::from_str::<InstanceState>(&c).map_err(|e| e.to_string()));
                match parsed {
                    Ok(state) => Some(state),
                    Err(e) => {
                        warn!(file = %p.display(), error = %e, "skipping unreadable instance state");
                        None
                    }
                }
            })
            .collect();
        states.sort_by(|a, b| a.handle.id.cmp(&b.handle.id));
        states
    }
}
