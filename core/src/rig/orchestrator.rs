//! Instance lifecycle orchestration.
//!
//! `CloudRunner` drives one target through the whole cloud scan:
//!
//! ```text
//! Init -> Provisioning -> InputPreparing -> LocalPreRun -> [WorkflowSync]
//!      -> TargetUpload -> RemotePreRun -> JobLaunch -> Polling -> [ResultSync]
//!      -> LocalPostRun -> [GitSync] -> Teardown -> Done
//! ```
//!
//! All side effects go through the injected collaborators (`CommandRunner`,
//! `Provider`, `ScriptRunner`, `WorkflowResolver`). A `CloudRunner` holds no
//! per-target state, so one instance is shared by every worker.
//!
//! Instance state is persisted as soon as Provisioning succeeds. Any
//! failure after that leaves the instance running for inspection unless
//! `cleanup_on_failure` is set; `cleanup` deletes such instances later from
//! their persisted state.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::config::InstanceHandle;
use super::remote::RemoteExecutor;
use super::retry::{retry_with_expected_substring, RetryPolicy};
use super::sync::{SyncJob, TRANSFER_DONE_MARKER};
use crate::chunk::remove_chunk_files;
use crate::context::PlaceholderContext;
use crate::error::ScanError;
use crate::hooks::{
    run_local_scripts, run_local_steps, run_remote_commands, HookFailure, HookStage,
    ScriptRunner, ShellScriptRunner,
};
use crate::infrastructure::runner::{CommandRunner, ShellRunner};
use crate::infrastructure::tmux::{shell_escape, TmuxCommandBuilder};
use crate::monitor::poller::CompletionPoller;
use crate::provider::command::CommandProvider;
use crate::provider::{InstanceSpec, Provider, ProviderAction};
use crate::store::instances::{InstanceState, InstanceStateStore};
use crate::store::runtime::{RuntimeRecord, RuntimeStore};
use crate::types::config::CloudConfig;
use crate::workflow::{
    scan_command_template, HookPlan, WorkflowResolver, WorkflowSelector, YamlWorkflowResolver,
};


// ---------------------------------------------------------------------------
// RunState / RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Init,
    Provisioning,
    InputPreparing,
    LocalPreRun,
    WorkflowSync,
    TargetUpload,
    RemotePreRun,
    JobLaunch,
    Polling,
    ResultSync,
    LocalPostRun,
    GitSync,
    Teardown,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub target: String,
    pub workspace: String,
    pub instance: Option<String>,
    pub state: RunState,
    /// Best-effort hooks that failed along the way.
    pub hook_failures: Vec<HookFailure>,
    pub interim_syncs: u64,
    pub torn_down: bool,
}

impl RunReport {
    fn new(target: &str) -> Self {
        RunReport {
            target: target.to_string(),
            workspace: String::new(),
            instance: None,
            state: RunState::Init,
            hook_failures: Vec::new(),
            interim_syncs: 0,
            torn_down: false,
        }
    }
}

/// Per-target mutable state threaded through the lifecycle steps.
struct Run {
    report: RunReport,
    record: Option<RuntimeRecord>,
}


// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// External capabilities the orchestrator consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub provider: Arc<dyn Provider>,
    pub scripts: Arc<dyn ScriptRunner>,
    pub resolver: Arc<dyn WorkflowResolver>,
}

impl Collaborators {
    /// Shell-backed collaborators driven by `config`.
    pub fn from_config(config: &CloudConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner);
        Collaborators {
            provider: Arc::new(CommandProvider::new(
                runner.clone(),
                config.provider.clone(),
                config.ssh.clone(),
            )),
            scripts: Arc::new(ShellScriptRunner::new(runner.clone())),
            resolver: Arc::new(YamlWorkflowResolver::new(&config.workflow_dir)),
            runner,
        }
    }
}


// ---------------------------------------------------------------------------
// CloudRunner
// ---------------------------------------------------------------------------

pub struct CloudRunner {
    config: Arc<CloudConfig>,
    parts: Collaborators,
    executor: RemoteExecutor,
    runtime: RuntimeStore,
    instances: InstanceStateStore,
    tmux: TmuxCommandBuilder,
    retry: RetryPolicy,
}

impl fmt::Debug for CloudRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudRunner")
            .field("product", &self.config.product)
            .field("concurrency", &self.config.concurrency)
            .finish()
    }
}

impl CloudRunner {
    pub fn new(config: Arc<CloudConfig>, parts: Collaborators) -> Self {
        CloudRunner {
            executor: RemoteExecutor::new(parts.runner.clone()),
            runtime: RuntimeStore::new(&config.workspaces_dir),
            instances: InstanceStateStore::new(&config.state_dir),
            tmux: TmuxCommandBuilder::new(),
            retry: RetryPolicy::from(&config.retry),
            config,
            parts,
        }
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn provider(&self) -> &dyn Provider {
        self.parts.provider.as_ref()
    }

    pub fn instance_store(&self) -> &InstanceStateStore {
        &self.instances
    }

    /// Run the full lifecycle for one target.
    pub fn run(&self, target: &str) -> Result<RunReport, ScanError> {
        let mut run = Run {
            report: RunReport::new(target),
            record: None,
        };
        info!(input = target, "starting cloud scan");

        self.enter(&mut run, RunState::Provisioning);
        let spec = InstanceSpec::new(&self.config.product, &self.config.provider);
        let handle = self
            .parts
            .provider
            .create_instance(&spec)
            .map_err(ScanError::ProvisionFailed)?;
        info!(input = target, instance = %handle.id, endpoint = %handle.endpoint, "instance provisioned");
        run.report.instance = Some(handle.id.clone());
        let mut state = InstanceState::provisioned(&handle, target);
        self.persist(&state);

        if self.config.only_create {
            debug!(instance = %handle.id, "only creating the instance, skipping the scan");
            self.enter(&mut run, RunState::Done);
            return Ok(run.report);
        }

        match self.drive(&mut state, &mut run) {
            Ok(()) => Ok(run.report),
            Err(e) => Err(self.abandon(&handle, e)),
        }
    }

    /// Resume monitoring an instance whose state was persisted at launch,
    /// then finish the lifecycle from Polling onward.
    pub fn resume(&self, instance_id: &str) -> Result<RunReport, ScanError> {
        let state = self.instances.load(instance_id)?;
        if !state.is_launched() {
            return Err(ScanError::NotLaunched(instance_id.to_string()));
        }
        info!(instance = %instance_id, input = %state.target, "resuming cloud scan");

        let selector = WorkflowSelector::from_settings(&self.config.scan);
        let plan = self.parts.resolver.resolve(&selector).map_err(ScanError::Workflow)?;
        let record = match self.runtime.read(&state.workspace) {
            Ok(Some(record)) => record,
            _ => RuntimeRecord::new(
                &state.workspace,
                &state.target,
                &selector.kind.to_string(),
                &selector.name,
            ),
        };

        let mut run = Run {
            report: RunReport::new(&state.target),
            record: Some(record),
        };
        run.report.workspace = state.workspace.clone();
        run.report.instance = Some(state.handle.id.clone());

        let result = self.finish(&state.handle, &state.context, &plan, &mut run);
        if let Some(ref chunk) = state.chunk_file {
            remove_chunk_files(std::slice::from_ref(chunk));
        }
        match result {
            Ok(()) => Ok(run.report),
            Err(e) => Err(self.abandon(&state.handle, e)),
        }
    }

    /// Delete every instance with persisted state. Returns the ids that
    /// were deleted and the failures.
    pub fn cleanup(&self) -> (Vec<String>, Vec<ScanError>) {
        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for state in self.instances.list() {
            match self.teardown(&state.handle.id) {
                Ok(()) => deleted.push(state.handle.id),
                Err(e) => {
                    error!(instance = %state.handle.id, error = %e, "cleanup failed");
                    failed.push(e);
                }
            }
        }
        (deleted, failed)
    }

    // -- lifecycle steps --

    fn drive(&self, state: &mut InstanceState, run: &mut Run) -> Result<(), ScanError> {
        let handle = &state.handle.clone();
        let target = state.target.clone();

        // InputPreparing
        self.enter(run, RunState::InputPreparing);
        let selector = WorkflowSelector::from_settings(&self.config.scan);
        let plan = self.parts.resolver.resolve(&selector).map_err(ScanError::Workflow)?;
        let ctx = self.prepare_context(&target, handle);
        run.report.workspace = ctx.workspace().to_string();
        state.workspace = ctx.workspace().to_string();
        state.context = ctx.clone();
        state.task_name = selector.name.clone();
        state.chunk_file = self.chunk_file_of(ctx.target());
        self.persist(state);
        debug!(
            workspace = ctx.workspace(),
            task_type = %selector.kind,
            task_name = %selector.name,
            "input prepared"
        );

        // LocalPreRun
        self.enter(run, RunState::LocalPreRun);
        let failures = run_local_scripts(
            self.parts.scripts.as_ref(),
            HookStage::LocalPreRun,
            &plan.local_pre_run,
            &ctx,
        );
        run.report.hook_failures.extend(failures);

        // WorkflowSync
        if self.config.sync_workflow {
            self.enter(run, RunState::WorkflowSync);
            self.transfer(&SyncJob::workflow(&self.config), handle)?;
        }

        // TargetUpload
        self.enter(run, RunState::TargetUpload);
        self.upload_target(&ctx, handle)?;

        // RemotePreRun
        self.enter(run, RunState::RemotePreRun);
        let failures = run_remote_commands(&self.executor, &handle.endpoint, &plan.remote_pre_run, &ctx);
        run.report.hook_failures.extend(failures);

        // JobLaunch
        let mut record = RuntimeRecord::new(
            ctx.workspace(),
            &target,
            &selector.kind.to_string(),
            &selector.name,
        );
        record.instance = Some(handle.id.clone());
        run.record = Some(record);
        self.enter(run, RunState::JobLaunch);
        self.launch(&ctx, handle)?;
        state.launched_at = Some(Utc::now());
        self.persist(state);

        self.finish(handle, &ctx, &plan, run)
    }

    /// Polling through Done. Shared by `run` and `resume`.
    fn finish(
        &self,
        handle: &InstanceHandle,
        ctx: &PlaceholderContext,
        plan: &HookPlan,
        run: &mut Run,
    ) -> Result<(), ScanError> {
        // Polling
        self.enter(run, RunState::Polling);
        if self.config.no_delete {
            info!(instance = %handle.id, "instance is kept, skipping active polling");
            pause(self.config.timing.no_delete_wait);
        } else {
            let mut poller = CompletionPoller::new(
                self.executor.clone(),
                handle.endpoint.clone(),
                ctx.workspace(),
                &self.config,
            );
            let outcome = poller.wait(&mut || self.sync_results(handle));
            run.report.interim_syncs = poller.interim_syncs();
            outcome?;
            info!(instance = %handle.id, workspace = ctx.workspace(), "scan is done");
        }

        // ResultSync
        if !self.config.disable_local_sync {
            self.enter(run, RunState::ResultSync);
            self.sync_results(handle)?;
            if self.config.no_delete {
                pause(self.config.timing.no_delete_resync);
                self.sync_results(handle)?;
            }
        }

        // LocalPostRun
        self.enter(run, RunState::LocalPostRun);
        let scripts = self.parts.scripts.as_ref();
        let mut failures = run_local_steps(scripts, &plan.local_steps, ctx);
        failures.extend(run_local_scripts(
            scripts,
            HookStage::LocalPostRun,
            &plan.local_post_run,
            ctx,
        ));
        run.report.hook_failures.extend(failures);

        // GitSync
        if self.config.git_sync {
            self.enter(run, RunState::GitSync);
            let template = format!("{} scan --nn -f sync -t {{{{Workspace}}}}", self.config.product);
            let cmd = ctx.resolve(&template);
            if let Err(e) = scripts.run_script(&cmd) {
                warn!(workspace = ctx.workspace(), error = %e.trim(), "git sync failed");
                run.report
                    .hook_failures
                    .push(HookFailure::new(HookStage::GitSync, &cmd, e.trim()));
            }
        }

        // Teardown
        if self.config.no_delete {
            info!(instance = %handle.id, endpoint = %handle.endpoint, "keeping instance alive");
        } else {
            self.enter(run, RunState::Teardown);
            self.teardown(&handle.id)?;
            run.report.torn_down = true;
        }

        self.enter(run, RunState::Done);
        Ok(())
    }

    /// Build the placeholder context for `target` and merge user params.
    fn prepare_context(&self, target: &str, handle: &InstanceHandle) -> PlaceholderContext {
        let local = Path::new(target);
        let target = if local.exists() {
            fs::canonicalize(local)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| target.to_string())
        } else {
            target.to_string()
        };

        let mut ctx = PlaceholderContext::for_target(
            &target,
            self.config.scan.workspace.as_deref(),
            &self.config,
        );
        ctx.insert("InstanceId", &handle.id);
        ctx.insert("PublicIP", &handle.public_ip);
        ctx.merge_params(&self.config.scan.params);
        ctx
    }

    fn upload_target(&self, ctx: &PlaceholderContext, handle: &InstanceHandle) -> Result<(), ScanError> {
        let local = Path::new(ctx.target());
        if !local.is_file() && !local.is_dir() {
            debug!(input = ctx.target(), "target is not file-backed, nothing to upload");
            return Ok(());
        }
        if let Some(parent) = local.parent() {
            let mkdir = format!("mkdir -p {}", shell_escape(&parent.to_string_lossy()));
            if let Err(e) = self.executor.exec(&handle.endpoint, &mkdir) {
                warn!(endpoint = %handle.endpoint, error = %e, "could not create remote input folder");
            }
        }
        self.transfer(&SyncJob::target(local), handle)
    }

    /// Open the multiplexed session, inject the scan command and confirm it
    /// is running.
    fn launch(&self, ctx: &PlaceholderContext, handle: &InstanceHandle) -> Result<(), ScanError> {
        let endpoint = &handle.endpoint;
        let as_list = self.target_is_list(ctx.target());
        let command = ctx.resolve(&scan_command_template(&self.config, as_list));
        let session = &self.config.poll.session;
        let new_session = self.tmux.new_session(session);

        match self.executor.exec(endpoint, &new_session) {
            Ok(_) => {}
            Err(e) if e.is_timeout() => {
                warn!(instance = %handle.id, endpoint = %endpoint, "session creation timed out, booting instance");
                pause(self.config.timing.boot_wait);
                if let Err(be) = self
                    .parts
                    .provider
                    .action(ProviderAction::BootInstance, Some(&handle.id))
                {
                    warn!(instance = %handle.id, error = %be, "boot action failed");
                }
                if let Err(e) = self.executor.exec(endpoint, &new_session) {
                    warn!(endpoint = %endpoint, error = %e, "session creation failed after boot");
                }
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "session creation failed, reusing existing session");
            }
        }

        self.executor
            .exec(endpoint, &self.tmux.send_keys(session, &command))
            .map_err(|e| ScanError::LaunchFailed {
                endpoint: endpoint.to_string(),
                reason: e.message().trim().to_string(),
            })?;
        info!(endpoint = %endpoint, command = %command, "scan command injected");

        pause(self.config.timing.settle);
        let liveness = CompletionPoller::new(
            self.executor.clone(),
            endpoint.clone(),
            ctx.workspace(),
            &self.config,
        );
        if !liveness.is_running() {
            return Err(ScanError::LaunchFailed {
                endpoint: endpoint.to_string(),
                reason: "no scan process found after the settle period".into(),
            });
        }
        Ok(())
    }

    fn sync_results(&self, handle: &InstanceHandle) -> Result<(), ScanError> {
        if !self.parts.provider.is_background_check() {
            info!(endpoint = %handle.endpoint, "syncing results");
        }
        fs::create_dir_all(self.config.local_sync_dir())?;
        self.transfer(&SyncJob::results(&self.config), handle)
    }

    fn transfer(&self, job: &SyncJob, handle: &InstanceHandle) -> Result<(), ScanError> {
        let cmd = job.command(&handle.endpoint);
        retry_with_expected_substring(self.parts.runner.as_ref(), &cmd, TRANSFER_DONE_MARKER, &self.retry)
            .map(|_| ())
    }

    fn teardown(&self, id: &str) -> Result<(), ScanError> {
        self.parts
            .provider
            .delete_instance(id)
            .map_err(|reason| ScanError::TeardownFailed {
                id: id.to_string(),
                reason,
            })?;
        if let Err(e) = self.instances.remove(id) {
            warn!(instance = %id, error = %e, "could not remove instance state");
        }
        info!(instance = %id, "instance deleted");
        Ok(())
    }

    /// Log a failed run and apply the cleanup policy.
    fn abandon(&self, handle: &InstanceHandle, err: ScanError) -> ScanError {
        error!(instance = %handle.id, endpoint = %handle.endpoint, error = %err, "cloud scan failed");
        if self.config.cleanup_on_failure {
            if let Err(e) = self.teardown(&handle.id) {
                error!(instance = %handle.id, error = %e, "cleanup after failure failed");
            }
        } else {
            warn!(
                instance = %handle.id,
                "instance left running for inspection, delete it with `cloudscan cleanup`"
            );
        }
        err
    }

    fn persist(&self, state: &InstanceState) {
        if let Err(e) = self.instances.save(state) {
            warn!(instance = %state.handle.id, error = %e, "could not persist instance state");
        }
    }

    fn enter(&self, run: &mut Run, state: RunState) {
        run.report.state = state;
        info!(input = %run.report.target, state = %state, "state transition");
        if let Some(ref mut record) = run.record {
            record.stage = state.to_string();
            if let Err(e) = self.runtime.write(&record.input_name.clone(), record) {
                warn!(workspace = %record.input_name, error = %e, "could not write runtime record");
            }
        }
    }

    fn chunk_file_of(&self, target: &str) -> Option<PathBuf> {
        if !self.config.chunk.enabled {
            return None;
        }
        let path = Path::new(target);
        let chunk_dir = fs::canonicalize(&self.config.chunk_dir).unwrap_or_else(|_| self.config.chunk_dir.clone());
        if path.is_file() && path.starts_with(&chunk_dir) {
            Some(path.to_path_buf())
        } else {
            None
        }
    }

    /// Chunk files, and file-backed targets when `target_as_file` is set,
    /// are handed to the scanner as target lists.
    fn target_is_list(&self, target: &str) -> bool {
        self.chunk_file_of(target).is_some()
            || (self.config.scan.target_as_file && Path::new(target).is_file())
    }
}

fn pause(d: Duration) {
    if !d.is_zero() {
        thread::sleep(d);
    }
}
