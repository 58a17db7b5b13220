//! Completion polling.
//!
//! After the scan job is launched, `CompletionPoller` samples the instance
//! until the job is finished or has failed:
//!
//! 1. one immediate check for the done marker;
//! 2. then, per iteration: sleep, re-check the marker, check that a scan
//!    process is still alive, scan the session output for a panic, and on
//!    every `sync_every`-th iteration run an interim result sync.
//!
//! A missing marker together with a missing process is a failure
//! (`ProcessDied`), never a success. The loop is unbounded unless an
//! iteration cap or deadline is configured.

use std::thread;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::process::ProcessQuery;
use crate::error::ScanError;
use crate::infrastructure::tmux::{shell_escape, TmuxCommandBuilder};
use crate::rig::config::SshEndpoint;
use crate::rig::remote::RemoteExecutor;
use crate::types::config::{CloudConfig, PollSettings};

/// Leading output of `file -b <marker>` that means the marker holds content.
const DONE_CONTENT_TYPES: &[&str] = &["ASCII text", "JSON data", "JSON text"];

/// Number of session lines scanned for panic signatures.
const CAPTURE_LINES: u32 = 500;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollState {
    Unchecked,
    Running,
    Done,
    ProcessDied,
    PanicDetected,
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Unchecked | PollState::Running)
    }
}

/// Whether `file` output describes a finished done marker.
pub fn is_done_output(output: &str) -> bool {
    let output = output.trim_start();
    DONE_CONTENT_TYPES.iter().any(|t| output.starts_with(t))
}


// ---------------------------------------------------------------------------
// CompletionPoller
// ---------------------------------------------------------------------------

pub struct CompletionPoller {
    executor: RemoteExecutor,
    processes: ProcessQuery,
    tmux: TmuxCommandBuilder,
    settings: PollSettings,
    endpoint: SshEndpoint,
    marker_path: String,
    state: PollState,
    iterations: u64,
    interim_syncs: u64,
}

impl CompletionPoller {
    pub fn new(
        executor: RemoteExecutor,
        endpoint: SshEndpoint,
        workspace: &str,
        config: &CloudConfig,
    ) -> Self {
        CompletionPoller {
            processes: ProcessQuery::new(executor.clone(), &config.product),
            executor,
            tmux: TmuxCommandBuilder::new(),
            settings: config.poll.clone(),
            endpoint,
            marker_path: config.done_marker_path(workspace),
            state: PollState::Unchecked,
            iterations: 0,
            interim_syncs: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn interim_syncs(&self) -> u64 {
        self.interim_syncs
    }

    /// Whether the done marker exists and holds text or JSON.
    pub fn check_marker(&self) -> bool {
        let cmd = format!("file -b {}", shell_escape(&self.marker_path));
        match self.executor.exec(&self.endpoint, &cmd) {
            Ok(out) => {
                let done = is_done_output(&out);
                debug!(endpoint = %self.endpoint, marker = %self.marker_path, done, "checked done marker");
                done
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "done marker check failed");
                false
            }
        }
    }

    /// Whether a scan process is alive on the instance.
    ///
    /// A failed query is inconclusive and counts as alive; only a
    /// successful, empty listing means the process is gone.
    pub fn is_running(&self) -> bool {
        if self.settings.ignore_process {
            return true;
        }
        match self.processes.list(&self.endpoint) {
            Ok(procs) => {
                debug!(endpoint = %self.endpoint, count = procs.len(), "scan processes");
                !procs.is_empty()
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "process query failed, assuming alive");
                true
            }
        }
    }

    /// Whether the session output contains a panic signature.
    pub fn panic_detected(&self) -> bool {
        if self.settings.panic_signatures.is_empty() {
            return false;
        }
        let cmd = self.tmux.capture_pane(&self.settings.session, CAPTURE_LINES);
        match self.executor.exec(&self.endpoint, &cmd) {
            Ok(out) => self
                .settings
                .panic_signatures
                .iter()
                .any(|sig| !sig.is_empty() && out.contains(sig.as_str())),
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "capture-pane failed");
                false
            }
        }
    }

    /// Poll until a terminal state, calling `interim_sync` every
    /// `sync_every` iterations. Interim sync failures are logged and
    /// polling continues.
    pub fn poll(&mut self, interim_sync: &mut dyn FnMut() -> Result<(), ScanError>) -> PollState {
        if self.check_marker() {
            self.state = PollState::Done;
            return self.state;
        }
        self.state = PollState::Running;
        let started = Instant::now();

        loop {
            if let Some(max) = self.settings.max_iterations {
                if self.iterations >= max {
                    self.state = PollState::TimedOut;
                    break;
                }
            }
            if let Some(deadline) = self.settings.deadline {
                if started.elapsed() >= deadline {
                    self.state = PollState::TimedOut;
                    break;
                }
            }

            if !self.settings.interval.is_zero() {
                thread::sleep(self.settings.interval);
            }
            self.iterations += 1;
            debug!(endpoint = %self.endpoint, iteration = self.iterations, "poll");

            if self.check_marker() {
                self.state = PollState::Done;
                break;
            }
            if !self.is_running() {
                self.state = PollState::ProcessDied;
                break;
            }
            if self.panic_detected() {
                self.state = PollState::PanicDetected;
                break;
            }

            if self.iterations % self.settings.sync_every.max(1) == 0 {
                info!(endpoint = %self.endpoint, iteration = self.iterations, "interim result sync");
                if let Err(e) = interim_sync() {
                    warn!(endpoint = %self.endpoint, error = %e, "interim result sync failed");
                }
                self.interim_syncs += 1;
            }
        }

        info!(endpoint = %self.endpoint, state = ?self.state, iterations = self.iterations, "polling finished");
        self.state
    }

    /// Poll and map the terminal state onto the error taxonomy.
    pub fn wait(&mut self, interim_sync: &mut dyn FnMut() -> Result<(), ScanError>) -> Result<(), ScanError> {
        let state = self.poll(interim_sync);
        let endpoint = self.endpoint.to_string();
        match state {
            PollState::Done => Ok(()),
            PollState::PanicDetected => Err(ScanError::PanicDetected { endpoint }),
            PollState::TimedOut => Err(ScanError::PollTimedOut {
                endpoint,
                iterations: self.iterations,
            }),
            PollState::ProcessDied | PollState::Unchecked | PollState::Running => {
                Err(ScanError::ProcessDied { endpoint })
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use crate::infrastructure::runner::MockRunner;

    const ALIVE: &str = " 1403 /usr/local/bin/osmedeus scan -f general -t example.com\n";
    const MISSING: &str = "cannot open `/root/workspaces-osmedeus/ws/done' (No such file or directory)";

    fn config() -> CloudConfig {
        let mut cfg = CloudConfig::default();
        cfg.poll.interval = Duration::ZERO;
        cfg
    }

    fn endpoint() -> SshEndpoint {
        SshEndpoint {
            user: "root".into(),
            host: "10.0.0.2".into(),
            port: 22,
            private_key: None,
            connect_timeout_secs: 5,
        }
    }

    fn poller(runner: &Arc<MockRunner>, cfg: &CloudConfig) -> CompletionPoller {
        CompletionPoller::new(RemoteExecutor::new(runner.clone()), endpoint(), "ws", cfg)
    }

    fn no_sync() -> impl FnMut() -> Result<(), ScanError> {
        || Ok(())
    }

    #[test]
    fn done_output_recognition() {
        assert!(is_done_output("ASCII text"));
        assert!(is_done_output("JSON data\n"));
        assert!(is_done_output("JSON text data"));
        assert!(!is_done_output("empty"));
        assert!(!is_done_output(MISSING));
        assert!(!is_done_output("cannot open `/root/workspaces-osmedeus/JSON data.com/done' (No such file or directory)"));
    }

    #[test]
    fn marker_check_uses_brief_output() {
        let runner = Arc::new(MockRunner::new().on("file ", Ok(MISSING.into())));
        let p = poller(&runner, &config());
        assert!(!p.check_marker());
        let cmds = runner.executed_commands();
        assert!(cmds[0].contains("file -b /root/workspaces-osmedeus/ws/done"));
    }

    #[test]
    fn immediate_marker_skips_polling() {
        let runner = Arc::new(MockRunner::new().on("file ", Ok("JSON data".into())));
        let mut p = poller(&runner, &config());
        assert_eq!(p.poll(&mut no_sync()), PollState::Done);
        assert_eq!(p.iterations(), 0);
        assert_eq!(runner.count_matching("ps -eo"), 0);
    }

    #[test]
    fn dead_process_without_marker_is_process_died() {
        let runner = Arc::new(
            MockRunner::new()
                .on("file ", Ok(MISSING.into()))
                .on("ps -eo", Ok("    1 /sbin/init\n".into())),
        );
        let mut p = poller(&runner, &config());
        let state = p.poll(&mut no_sync());
        assert_eq!(state, PollState::ProcessDied);
        assert_ne!(state, PollState::Done);
        assert_eq!(p.iterations(), 1);
    }

    #[test]
    fn wait_maps_process_died_to_error() {
        let runner = Arc::new(
            MockRunner::new()
                .on("file ", Ok(MISSING.into()))
                .on("ps -eo", Ok(String::new())),
        );
        let mut p = poller(&runner, &config());
        let err = p.wait(&mut no_sync()).unwrap_err();
        assert!(matches!(err, ScanError::ProcessDied { .. }));
    }

    #[test]
    fn interim_sync_on_fiftieth_iteration() {
        let runner = Arc::new(
            MockRunner::new()
                .on_times("file ", Ok(MISSING.into()), 51)
                .on("file ", Ok("ASCII text".into()))
                .on("ps -eo", Ok(ALIVE.into()))
                .on("capture-pane", Ok("progress 40%".into())),
        );
        let mut p = poller(&runner, &config());
        let mut syncs = 0;
        let state = p.poll(&mut || {
            syncs += 1;
            Ok(())
        });
        assert_eq!(state, PollState::Done);
        assert_eq!(p.iterations(), 51);
        assert_eq!(syncs, 1);
        assert_eq!(p.interim_syncs(), 1);
    }

    #[test]
    fn failing_interim_sync_keeps_polling() {
        let runner = Arc::new(
            MockRunner::new()
                .on_times("file ", Ok(MISSING.into()), 3)
                .on("file ", Ok("ASCII text".into()))
                .on("ps -eo", Ok(ALIVE.into())),
        );
        let mut cfg = config();
        cfg.poll.sync_every = 1;
        let mut p = poller(&runner, &cfg);
        let mut sync = || -> Result<(), ScanError> {
            Err(ScanError::TransferFailed { command: "rsync".into(), attempts: 1 })
        };
        assert_eq!(p.poll(&mut sync), PollState::Done);
        assert_eq!(p.interim_syncs(), 2);
    }

    #[test]
    fn panic_signature_fails_immediately() {
        let runner = Arc::new(
            MockRunner::new()
                .on("file ", Ok(MISSING.into()))
                .on("ps -eo", Ok(ALIVE.into()))
                .on("capture-pane", Ok("goroutine 1 [running]:\npanic: runtime error".into())),
        );
        let mut p = poller(&runner, &config());
        let err = p.wait(&mut no_sync()).unwrap_err();
        assert!(matches!(err, ScanError::PanicDetected { .. }));
        assert_eq!(p.state(), PollState::PanicDetected);
    }

    #[test]
    fn failed_process_query_is_inconclusive() {
        let runner = Arc::new(
            MockRunner::new()
                .on("file ", Ok(MISSING.into()))
                .on("ps -eo", Err("Connection reset by peer".into())),
        );
        let mut cfg = config();
        cfg.poll.max_iterations = Some(3);
        let mut p = poller(&runner, &cfg);
        let err = p.wait(&mut no_sync()).unwrap_err();
        assert!(matches!(err, ScanError::PollTimedOut { iterations: 3, .. }));
        assert_eq!(p.state(), PollState::TimedOut);
    }

    #[test]
    fn ignore_process_never_reports_death() {
        let runner = Arc::new(
            MockRunner::new()
                .on("file ", Ok(MISSING.into()))
                .on("ps -eo", Ok(String::new())),
        );
        let mut cfg = config();
        cfg.poll.ignore_process = true;
        cfg.poll.max_iterations = Some(2);
        let mut p = poller(&runner, &cfg);
        assert_eq!(p.poll(&mut no_sync()), PollState::TimedOut);
        assert_eq!(runner.count_matching("ps -eo"), 0);
    }

    #[test]
    fn terminal_states() {
        assert!(!PollState::Unchecked.is_terminal());
        assert!(!PollState::Running.is_terminal());
        assert!(PollState::Done.is_terminal());
        assert!(PollState::TimedOut.is_terminal());
    }
}
