//! Per-workspace runtime records.
//!
//! Each workspace directory carries a small `runtime` JSON file describing
//! the scan that owns it, so reporting tools can list in-flight and finished
//! scans without talking to the orchestrator. The file is rewritten in full
//! on every update and never deleted here.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ScanError;

/// File name of the record inside a workspace directory.
pub const RUNTIME_FILE: &str = "runtime";


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRecord {
    pub is_cloud: bool,
    /// Workspace name the scan writes into.
    pub input_name: String,
    /// Original target string.
    #[serde(default)]
    pub target: String,
    /// "flow" or "module".
    pub task_type: String,
    pub task_name: String,
    /// Last lifecycle state reached, e.g. "Polling".
    #[serde(default)]
    pub stage: String,
    /// Provider id of the instance running the scan.
    #[serde(default)]
    pub instance: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RuntimeRecord {
    pub fn new(input_name: &str, target: &str, task_type: &str, task_name: &str) -> Self {
        let now = Utc::now();
        RuntimeRecord {
            is_cloud: true,
            input_name: input_name.to_string(),
            target: target.to_string(),
            task_type: task_type.to_string(),
            task_name: task_name.to_string(),
            stage: String::new(),
            instance: None,
            created_at: now,
            updated_at: now,
        }
    }
}


/// Reads and writes runtime records under a workspaces root.
#[derive(Debug, Clone)]
pub struct RuntimeStore {
    root: PathBuf,
}

impl RuntimeStore {
    pub fn new(root: &Path) -> Self {
        RuntimeStore {
            root: root.to_path_buf(),
        }
    }

    pub fn path(&self, workspace: &str) -> PathBuf {
        self.root.join(workspace).join(RUNTIME_FILE)
    }

    /// Overwrite the record of `workspace`, stamping `updated_at`.
    pub fn write(&self, workspace: &str, record: &mut RuntimeRecord) -> Result<(), ScanError> {
        record.updated_at = Utc::now();
        let path = self.path(workspace);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        debug!(workspace, stage = %record.stage, file = %path.display(), "updated runtime record");
        Ok(())
    }

    /// Read the record of `workspace`, if present.
    pub fn read(&self, workspace: &str) -> Result<Option<RuntimeRecord>, ScanError> {
        let path = self.path(workspace);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Every readable record under the root, ordered by workspace name.
    /// Workspaces without a record or with a corrupt one are skipped.
    pub fn read_all(&self) -> Vec<RuntimeRecord> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "no workspaces to read");
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        names
            .iter()
            .filter_map(|ws| match self.read(ws) {
                Ok(record) => record,
                Err(e) => {
                    warn!(workspace = %ws, error = %e, "skipping unreadable runtime record");
                    None
                }
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path());
        let mut record = RuntimeRecord::new("example.com", "example.com", "flow", "general");
        record.stage = "Polling".into();
        store.write("example.com", &mut record).unwrap();

        let back = store.read("example.com").unwrap().unwrap();
        assert_eq!(back, record);
        assert!(back.is_cloud);
        assert!(dir.path().join("example.com").join("runtime").is_file());
    }

    #[test]
    fn write_overwrites_and_bumps_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path());
        let mut record = RuntimeRecord::new("ws", "t", "module", "subdomain");
        store.write("ws", &mut record).unwrap();
        let first = record.updated_at;
        record.stage = "Done".into();
        store.write("ws", &mut record).unwrap();

        let back = store.read("ws").unwrap().unwrap();
        assert_eq!(back.stage, "Done");
        assert!(back.updated_at >= first);
        assert_eq!(back.created_at, record.created_at);
    }

    #[test]
    fn read_all_skips_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeStore::new(dir.path());
        store.write("b.com", &mut RuntimeRecord::new("b.com", "b.com", "flow", "general")).unwrap();
        store.write("a.com", &mut RuntimeRecord::new("a.com", "a.com", "flow", "general")).unwrap();
        fs::create_dir_all(dir.path().join("empty-ws")).unwrap();
        fs::create_dir_all(dir.path().join("bad-ws")).unwrap();
        fs::write(dir.path().join("bad-ws").join(RUNTIME_FILE), "{not json").unwrap();
        fs::write(dir.path().join("stray-file"), "x").unwrap();

        let all = store.read_all();
        let names: Vec<&str> = all.iter().map(|r| r.input_name.as_str()).collect();
        assert_eq!(names, vec!["a.com", "b.com"]);
    }

    #[test]
    fn read_all_on_missing_root_is_empty() {
        let store = RuntimeStore::new(Path::new("/nonexistent/cloudscan/ws"));
        assert!(store.read_all().is_empty());
    }
}
