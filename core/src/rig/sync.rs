//! File synchronisation via rsync.
//!
//! Builds the rsync commands for the three bulk transfers of a scan:
//! workflow upload, target upload and result download. Nothing here runs a
//! process; the orchestrator hands the command to the retry primitive,
//! which accepts a transfer once rsync prints its `bytes/sec` summary.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::config::SshEndpoint;
use crate::infrastructure::tmux::shell_escape;
use crate::types::config::CloudConfig;

/// Substring of rsync's summary line that marks a finished transfer.
pub const TRANSFER_DONE_MARKER: &str = "bytes/sec";


// ---------------------------------------------------------------------------
// SyncJob
// ---------------------------------------------------------------------------

/// Whether a sync job pushes files to or pulls files from an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Local -> Remote.
    Push,
    /// Remote -> Local.
    Pull,
}

/// A single file synchronisation operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub direction: SyncDirection,
    /// Local filesystem path.
    pub local_path: String,
    /// Path on the instance.
    pub remote_path: String,
}

impl SyncJob {
    pub fn push(local: &str, remote: &str) -> Self {
        SyncJob {
            direction: SyncDirection::Push,
            local_path: local.to_string(),
            remote_path: remote.to_string(),
        }
    }

    pub fn pull(remote: &str, local: &str) -> Self {
        SyncJob {
            direction: SyncDirection::Pull,
            local_path: local.to_string(),
            remote_path: remote.to_string(),
        }
    }

    /// Upload of the local workflow tree.
    pub fn workflow(config: &CloudConfig) -> Self {
        SyncJob::push(
            &ensure_trailing_slash(&config.workflow_dir.to_string_lossy()),
            &config.remote_workflow_dir(),
        )
    }

    /// Upload of a file-backed target so it lands at the same absolute
    /// path on the instance.
    pub fn target(local: &Path) -> Self {
        let parent = local
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        SyncJob::push(
            &local.to_string_lossy().trim_end_matches('/').to_string(),
            &ensure_trailing_slash(&parent),
        )
    }

    /// Download of the remote workspaces into the local sync folder.
    pub fn results(config: &CloudConfig) -> Self {
        SyncJob::pull(
            &config.remote_sync_dir(),
            &ensure_trailing_slash(&config.local_sync_dir().to_string_lossy()),
        )
    }

    /// Build the rsync argument vector for this job.
    pub fn build_rsync_args(&self, endpoint: &SshEndpoint) -> Vec<String> {
        let mut args = vec![
            "-e".to_string(),
            endpoint.rsync_transport(),
            "-avzr".to_string(),
            "--progress".to_string(),
        ];

        let remote_spec = format!("{}:{}", endpoint.user_at_host(), self.remote_path);
        match self.direction {
            SyncDirection::Push => {
                args.push(self.local_path.clone());
                args.push(remote_spec);
            }
            SyncDirection::Pull => {
                args.push(remote_spec);
                args.push(self.local_path.clone());
            }
        }
        args
    }

    /// The full shell command for this job.
    pub fn command(&self, endpoint: &SshEndpoint) -> String {
        let mut parts = vec!["rsync".to_string()];
        parts.extend(self.build_rsync_args(endpoint).iter().map(|a| shell_escape(a)));
        parts.join(" ")
    }
}


/// Ensure a path ends with `/` (rsync convention for syncing directory contents).
fn ensure_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn endpoint() -> SshEndpoint {
        SshEndpoint {
            user: "root".into(),
            host: "10.0.0.9".into(),
            port: 22,
            private_key: Some("/keys/id_rsa".into()),
            connect_timeout_secs: 30,
        }
    }

    #[test]
    fn push_puts_remote_last() {
        let job = SyncJob::push("/tmp/in.txt", "/tmp/in.txt");
        let args = job.build_rsync_args(&endpoint());
        assert_eq!(args[0], "-e");
        assert!(args[1].contains("UserKnownHostsFile=/dev/null"));
        assert!(args[1].contains("-i /keys/id_rsa"));
        assert_eq!(args[args.len() - 2], "/tmp/in.txt");
        assert_eq!(args[args.len() - 1], "root@10.0.0.9:/tmp/in.txt");
    }

    #[test]
    fn target_upload_goes_to_parent_dir() {
        let job = SyncJob::target(Path::new("/tmp/osm-tmp-inputs/targets.txt-chunk-0"));
        assert_eq!(job.local_path, "/tmp/osm-tmp-inputs/targets.txt-chunk-0");
        assert_eq!(job.remote_path, "/tmp/osm-tmp-inputs/");
    }

    #[test]
    fn results_pull_into_local_sync_dir() {
        let mut cfg = CloudConfig::default();
        cfg.workspaces_dir = PathBuf::from("/home/me/ws");
        cfg.base_workspace = "batch".into();
        let job = SyncJob::results(&cfg);
        assert_eq!(job.direction, SyncDirection::Pull);
        assert_eq!(job.remote_path, "/root/workspaces-osmedeus/");
        assert_eq!(job.local_path, "/home/me/ws/batch/");

        let cmd = job.command(&endpoint());
        assert!(cmd.starts_with("rsync -e 'ssh -o StrictHostKeyChecking=no"));
        assert!(cmd.ends_with("root@10.0.0.9:/root/workspaces-osmedeus/ /home/me/ws/batch/"));
    }

    #[test]
    fn workflow_upload_syncs_directory_contents() {
        let mut cfg = CloudConfig::default();
        cfg.workflow_dir = PathBuf::from("/opt/workflow");
        let job = SyncJob::workflow(&cfg);
        assert_eq!(job.local_path, "/opt/workflow/");
        assert_eq!(job.remote_path, "/root/osmedeus-base/");
    }

    #[test]
    fn ensure_trailing_slash_adds_when_missing() {
        assert_eq!(ensure_trailing_slash("/path/to/dir"), "/path/to/dir/");
        assert_eq!(ensure_trailing_slash("/path/to/dir/"), "/path/to/dir/");
    }
}
