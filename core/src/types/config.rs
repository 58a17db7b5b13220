//! Cloud scan configuration.
//!
//! `CloudConfig` is loaded once from a YAML file (every field has a default,
//! so an empty file is valid), overridden by CLI flags, and then passed by
//! reference into the orchestrator, the poller and the executor.
//! Durations are human-readable strings ("10m", "90s"); a bare integer
//! means seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ScanError;


// ---------------------------------------------------------------------------
// CloudConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for distributed cloud scans.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CloudConfig {
    /// Name of the scanning binary on the instance. Used to filter the
    /// remote process list and to build remote workspace paths.
    pub product: String,

    /// Home directory of the scanning user on the instance.
    pub remote_base: String,

    /// Local directory holding one folder per workspace.
    pub workspaces_dir: PathBuf,

    /// Local directory for persisted instance addressing state.
    pub state_dir: PathBuf,

    /// Local workflow tree uploaded when `sync_workflow` is set.
    pub workflow_dir: PathBuf,

    /// Remote destination of the workflow tree. Defaults to
    /// `<remote_base>/<product>-base/`.
    pub remote_workflow_dir: Option<String>,

    /// Remote folder pulled back during result sync. Defaults to
    /// `<remote_base>/workspaces-<product>/`.
    pub remote_sync_dir: Option<String>,

    /// Sub-folder of `workspaces_dir` that receives synced results.
    pub base_workspace: String,

    /// Directory where chunk files are materialized.
    pub chunk_dir: PathBuf,

    /// Number of instances driven in parallel.
    pub concurrency: usize,

    pub ssh: SshSettings,
    pub scan: ScanSettings,
    pub chunk: ChunkSettings,
    pub poll: PollSettings,
    pub retry: RetrySettings,
    pub timing: TimingSettings,
    pub provider: ProviderSettings,

    /// Stop right after the instance is created.
    pub only_create: bool,
    /// Upload `workflow_dir` before the scan starts.
    pub sync_workflow: bool,
    /// Skip pulling results back to the local workspace.
    pub disable_local_sync: bool,
    /// Keep the instance alive after the scan.
    pub no_delete: bool,
    /// Re-run the scanner in sync-only mode against the local workspace.
    pub git_sync: bool,
    /// Delete the instance when any step after provisioning fails.
    pub cleanup_on_failure: bool,
}

impl Default for CloudConfig {
    fn default() -> Self {
        let root = default_root();
        CloudConfig {
            product: "osmedeus".into(),
            remote_base: "/root".into(),
            workspaces_dir: root.join("workspaces"),
            state_dir: root.join("state"),
            workflow_dir: root.join("workflow"),
            remote_workflow_dir: None,
            remote_sync_dir: None,
            base_workspace: String::new(),
            chunk_dir: PathBuf::from("/tmp/osm-tmp-inputs/"),
            concurrency: 1,
            ssh: SshSettings::default(),
            scan: ScanSettings::default(),
            chunk: ChunkSettings::default(),
            poll: PollSettings::default(),
            retry: RetrySettings::default(),
            timing: TimingSettings::default(),
            provider: ProviderSettings::default(),
            only_create: false,
            sync_workflow: false,
            disable_local_sync: false,
            no_delete: false,
            git_sync: false,
            cleanup_on_failure: false,
        }
    }
}

impl CloudConfig {
    /// Load a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<CloudConfig, ScanError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse a configuration from a YAML string. Blank input yields defaults.
    pub fn parse(content: &str) -> Result<CloudConfig, ScanError> {
        if content.trim().is_empty() {
            return Ok(CloudConfig::default());
        }
        let config: CloudConfig = serde_yaml::from_str(content)
            .map_err(|e| ScanError::Config(format!("invalid cloud config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.concurrency == 0 {
            return Err(ScanError::Config("concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ScanError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.poll.sync_every == 0 {
            return Err(ScanError::Config("poll.sync_every must be at least 1".into()));
        }
        if self.product.trim().is_empty() {
            return Err(ScanError::Config("product must not be empty".into()));
        }
        Ok(())
    }

    /// `<remote_base>/workspaces-<product>`
    pub fn remote_workspaces_dir(&self) -> String {
        format!(
            "{}/workspaces-{}",
            self.remote_base.trim_end_matches('/'),
            self.product
        )
    }

    /// Remote path of the done marker written by the scan job.
    pub fn done_marker_path(&self, workspace: &str) -> String {
        format!("{}/{}/done", self.remote_workspaces_dir(), workspace)
    }

    pub fn remote_workflow_dir(&self) -> String {
        match self.remote_workflow_dir {
            Some(ref dir) if !dir.is_empty() => dir.clone(),
            _ => format!(
                "{}/{}-base/",
                self.remote_base.trim_end_matches('/'),
                self.product
            ),
        }
    }

    pub fn remote_sync_dir(&self) -> String {
        match self.remote_sync_dir {
            Some(ref dir) if !dir.is_empty() => dir.clone(),
            _ => format!("{}/", self.remote_workspaces_dir()),
        }
    }

    /// Local folder receiving synced results.
    pub fn local_sync_dir(&self) -> PathBuf {
        if self.base_workspace.is_empty() {
            self.workspaces_dir.clone()
        } else {
            self.workspaces_dir.join(&self.base_workspace)
        }
    }

    /// Number of chunks an input file is split into.
    pub fn chunk_parts(&self) -> usize {
        match self.chunk.parts {
            Some(n) if n > 0 => n,
            _ => self.concurrency.max(1),
        }
    }
}


// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// How the engine reaches instances over SSH.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshSettings {
    pub user: String,
    pub port: u16,
    pub private_key: PathBuf,
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        SshSettings {
            user: "root".into(),
            port: 22,
            private_key: default_root().join("secret").join("id_rsa"),
            connect_timeout_secs: 30,
        }
    }
}

/// What gets run on the instance.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanSettings {
    pub module: Option<String>,
    pub flow: Option<String>,
    /// Workspace name override. Defaults to one derived from the target.
    pub workspace: Option<String>,
    /// Extra `key=value` placeholder parameters.
    pub params: Vec<String>,
    /// Full command template that replaces the synthesized one.
    pub raw_command: Option<String>,
    /// Raw text appended to the synthesized command.
    pub extra: Option<String>,
    /// Concurrency passed to the scanner on the instance.
    pub remote_threads: u32,
    /// Pass file-backed targets with `-T` (list file) instead of `-t`.
    /// Chunk files always use `-T`; bare targets always use `-t`.
    pub target_as_file: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkSettings {
    pub enabled: bool,
    /// Number of parts; defaults to the configured concurrency.
    pub parts: Option<usize>,
}

/// Completion polling behaviour.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollSettings {
    #[serde(deserialize_with = "human_duration")]
    pub interval: Duration,
    /// Run an interim result sync every N iterations.
    pub sync_every: u64,
    /// Give up after this many iterations. Unbounded when unset.
    pub max_iterations: Option<u64>,
    /// Give up once this much time has passed. Unbounded when unset.
    #[serde(deserialize_with = "human_duration_opt")]
    pub deadline: Option<Duration>,
    /// Treat the scan process as always alive.
    pub ignore_process: bool,
    /// Substrings in the session output that mean the job panicked.
    pub panic_signatures: Vec<String>,
    /// Name of the multiplexed session the job runs in.
    pub session: String,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval: Duration::from_secs(600),
            sync_every: 50,
            max_iterations: None,
            deadline: None,
            ignore_process: false,
            panic_signatures: vec!["panic:".into()],
            session: "main".into(),
        }
    }
}

/// Retry budget for bulk transfers.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(deserialize_with = "human_duration")]
    pub delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 10,
            delay: Duration::from_secs(10),
        }
    }
}

/// Fixed waits inside the lifecycle.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    /// Wait between injecting the job and checking it is alive.
    #[serde(deserialize_with = "human_duration")]
    pub settle: Duration,
    /// Wait before booting an instance whose SSH session timed out.
    #[serde(deserialize_with = "human_duration")]
    pub boot_wait: Duration,
    /// Single wait that replaces polling when the instance is kept.
    #[serde(deserialize_with = "human_duration")]
    pub no_delete_wait: Duration,
    /// Delay before the second result sync when the instance is kept.
    #[serde(deserialize_with = "human_duration")]
    pub no_delete_resync: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        TimingSettings {
            settle: Duration::from_secs(60),
            boot_wait: Duration::from_secs(60),
            no_delete_wait: Duration::from_secs(60),
            no_delete_resync: Duration::from_secs(100),
        }
    }
}

impl TimingSettings {
    /// All waits set to zero.
    pub fn immediate() -> Self {
        TimingSettings {
            settle: Duration::ZERO,
            boot_wait: Duration::ZERO,
            no_delete_wait: Duration::ZERO,
            no_delete_resync: Duration::ZERO,
        }
    }
}

/// Shell command templates for `CommandProvider`.
///
/// Templates may reference `{{Name}}`, `{{InstanceId}}`, `{{Image}}`,
/// `{{Region}}` and `{{Size}}`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub image: String,
    pub region: String,
    pub size: String,
    /// Must print a JSON object with `id` and `public_ip`.
    pub create: String,
    pub delete: String,
    pub boot: String,
    pub build_image: String,
    pub list_images: String,
    /// The provider only supports background health checks.
    pub background_check: bool,
}


// ---------------------------------------------------------------------------
// Duration parsing
// ---------------------------------------------------------------------------

/// Parse "10m", "90s", "1h 30m" or a bare number of seconds.
pub fn parse_interval(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".into());
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| format!("invalid duration '{}': {}", raw, e))
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = DurationRepr::deserialize(deserializer)?;
    raw.into_duration().map_err(serde::de::Error::custom)
}

fn human_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<DurationRepr>::deserialize(deserializer)?;
    raw.map(|r| r.into_duration())
        .transpose()
        .map_err(serde::de::Error::custom)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Secs(u64),
    Text(String),
}

impl DurationRepr {
    fn into_duration(self) -> Result<Duration, String> {
        match self {
            DurationRepr::Secs(secs) => Ok(Duration::from_secs(secs)),
            DurationRepr::Text(text) => parse_interval(&text),
        }
    }
}

fn default_root() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".cloudscan")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_defaults() {
        let cfg = CloudConfig::parse("").unwrap();
        assert_eq!(cfg, CloudConfig::default());
        assert_eq!(cfg.retry.max_attempts, 10);
        assert_eq!(cfg.poll.sync_every, 50);
        assert_eq!(cfg.poll.interval, Duration::from_secs(600));
    }

    #[test]
    fn parse_overrides_nested_sections() {
        let yaml = r#"
product: scanner
concurrency: 4
poll:
  interval: 2m
  max_iterations: 30
  deadline: 12h
retry:
  max_attempts: 3
  delay: 5
chunk:
  enabled: true
scan:
  flow: general
  params:
    - "wordlist=/tmp/words.txt"
"#;
        let cfg = CloudConfig::parse(yaml).unwrap();
        assert_eq!(cfg.product, "scanner");
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.poll.interval, Duration::from_secs(120));
        assert_eq!(cfg.poll.max_iterations, Some(30));
        assert_eq!(cfg.poll.deadline, Some(Duration::from_secs(12 * 3600)));
        assert_eq!(cfg.poll.sync_every, 50);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.delay, Duration::from_secs(5));
        assert!(cfg.chunk.enabled);
        assert_eq!(cfg.chunk_parts(), 4);
        assert_eq!(cfg.scan.flow.as_deref(), Some("general"));
        assert_eq!(cfg.scan.params, vec!["wordlist=/tmp/words.txt"]);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = CloudConfig::parse("concurrency: 0\n").unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn malformed_duration_rejected() {
        let err = CloudConfig::parse("poll:\n  interval: soon\n").unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn parse_interval_forms() {
        assert_eq!(parse_interval("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_interval("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_interval(" 1h 30m ").unwrap(), Duration::from_secs(5400));
        assert!(parse_interval("").is_err());
        assert!(parse_interval("ten").is_err());
    }

    #[test]
    fn remote_paths_follow_product() {
        let mut cfg = CloudConfig::default();
        cfg.product = "osmedeus".into();
        cfg.remote_base = "/root/".into();
        assert_eq!(cfg.remote_workspaces_dir(), "/root/workspaces-osmedeus");
        assert_eq!(
            cfg.done_marker_path("example.com"),
            "/root/workspaces-osmedeus/example.com/done"
        );
        assert_eq!(cfg.remote_workflow_dir(), "/root/osmedeus-base/");
        assert_eq!(cfg.remote_sync_dir(), "/root/workspaces-osmedeus/");

        cfg.remote_sync_dir = Some("/data/out/".into());
        assert_eq!(cfg.remote_sync_dir(), "/data/out/");
    }

    #[test]
    fn explicit_chunk_parts_win() {
        let mut cfg = CloudConfig::default();
        cfg.concurrency = 3;
        cfg.chunk.parts = Some(7);
        assert_eq!(cfg.chunk_parts(), 7);
        cfg.chunk.parts = Some(0);
        assert_eq!(cfg.chunk_parts(), 3);
    }

    #[test]
    fn local_sync_dir_uses_base_workspace() {
        let mut cfg = CloudConfig::default();
        cfg.workspaces_dir = PathBuf::from("/ws");
        assert_eq!(cfg.local_sync_dir(), PathBuf::from("/ws"));
        cfg.base_workspace = "batch-1".into();
        assert_eq!(cfg.local_sync_dir(), PathBuf::from("/ws/batch-1"));
    }
}
