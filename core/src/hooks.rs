//! Best-effort pre/post-run hooks.
//!
//! Hooks are supplementary: a failing hook never aborts a scan. Each stage
//! runs its commands in order, resolving every template right before it
//! runs, and returns the failures so the caller decides whether to surface
//! them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::PlaceholderContext;
use crate::infrastructure::runner::CommandRunner;
use crate::rig::config::SshEndpoint;
use crate::rig::remote::RemoteExecutor;
use crate::workflow::LocalStep;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookStage {
    LocalPreRun,
    RemotePreRun,
    LocalSteps,
    LocalPostRun,
    GitSync,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookStage::LocalPreRun => "local-pre-run",
            HookStage::RemotePreRun => "remote-pre-run",
            HookStage::LocalSteps => "local-steps",
            HookStage::LocalPostRun => "local-post-run",
            HookStage::GitSync => "git-sync",
        };
        f.write_str(name)
    }
}

/// One hook that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailure {
    pub stage: HookStage,
    /// The resolved command or the step name.
    pub step: String,
    pub error: String,
}

impl HookFailure {
    pub fn new(stage: HookStage, step: &str, error: &str) -> Self {
        HookFailure {
            stage,
            step: step.to_string(),
            error: error.to_string(),
        }
    }
}


// ---------------------------------------------------------------------------
// ScriptRunner
// ---------------------------------------------------------------------------

/// Runs local scripts and steps.
pub trait ScriptRunner: Send + Sync {
    /// Run an already resolved script.
    fn run_script(&self, script: &str) -> Result<String, String>;

    /// Run every command of `step`, resolved against `ctx`. Stops at the
    /// first failing command.
    fn run_step(&self, step: &LocalStep, ctx: &PlaceholderContext) -> Result<(), String> {
        for template in &step.commands {
            let cmd = ctx.resolve(template);
            self.run_script(&cmd)
                .map_err(|e| format!("{}: {}", cmd, e.trim()))?;
        }
        Ok(())
    }
}

/// Runs scripts through a `CommandRunner` (`sh -c` in production).
pub struct ShellScriptRunner {
    runner: Arc<dyn CommandRunner>,
}

impl ShellScriptRunner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        ShellScriptRunner { runner }
    }
}

impl ScriptRunner for ShellScriptRunner {
    fn run_script(&self, script: &str) -> Result<String, String> {
        self.runner.run(script)
    }
}


// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Resolve and run local script templates in order.
pub fn run_local_scripts(
    runner: &dyn ScriptRunner,
    stage: HookStage,
    templates: &[String],
    ctx: &PlaceholderContext,
) -> Vec<HookFailure> {
    if !templates.is_empty() {
        info!(stage = %stage, count = templates.len(), workspace = ctx.workspace(), "running local hooks");
    }
    let mut failures = Vec::new();
    for template in templates {
        let script = ctx.resolve(template);
        if let Err(e) = runner.run_script(&script) {
            warn!(stage = %stage, script = %script, error = %e.trim(), "local hook failed");
            failures.push(HookFailure::new(stage, &script, e.trim()));
        }
    }
    failures
}

/// Run local steps in order.
pub fn run_local_steps(
    runner: &dyn ScriptRunner,
    steps: &[LocalStep],
    ctx: &PlaceholderContext,
) -> Vec<HookFailure> {
    let mut failures = Vec::new();
    for (index, step) in steps.iter().enumerate() {
        if let Err(e) = runner.run_step(step, ctx) {
            let name = if step.name.is_empty() {
                format!("step-{}", index)
            } else {
                step.name.clone()
            };
            warn!(step = %name, error = %e, "local step failed");
            failures.push(HookFailure::new(HookStage::LocalSteps, &name, &e));
        }
    }
    failures
}

/// Resolve and run command templates on the instance, in order.
pub fn run_remote_commands(
    executor: &RemoteExecutor,
    endpoint: &SshEndpoint,
    templates: &[String],
    ctx: &PlaceholderContext,
) -> Vec<HookFailure> {
    if !templates.is_empty() {
        info!(endpoint = %endpoint, count = templates.len(), "running remote pre-run commands");
    }
    let mut failures = Vec::new();
    for template in templates {
        let cmd = ctx.resolve(template);
        if let Err(e) = executor.exec(endpoint, &cmd) {
            warn!(endpoint = %endpoint, command = %cmd, error = %e, "remote pre-run command failed");
            failures.push(HookFailure::new(HookStage::RemotePreRun, &cmd, e.message().trim()));
        }
    }
    failures
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runner::MockRunner;

    fn ctx() -> PlaceholderContext {
        let mut c = PlaceholderContext::new();
        c.insert("Workspace", "example.com");
        c
    }

    #[test]
    fn failure_display_of_stage() {
        let f = HookFailure::new(HookStage::GitSync, "osmedeus scan --nn -f sync", "exit 1");
        assert_eq!(f.stage.to_string(), "git-sync");
        assert_eq!(f.step, "osmedeus scan --nn -f sync");
        assert_eq!(f.error, "exit 1");
    }

    #[test]
    fn local_scripts_continue_after_failure() {
        let runner = Arc::new(MockRunner::new().on("second", Err("boom\n".into())));
        let scripts = ShellScriptRunner::new(runner.clone());
        let failures = run_local_scripts(
            &scripts,
            HookStage::LocalPreRun,
            &[
                "first {{Workspace}}".to_string(),
                "second {{Workspace}}".to_string(),
                "third".to_string(),
            ],
            &ctx(),
        );
        assert_eq!(runner.executed_commands(), vec!["first example.com", "second example.com", "third"]);
        assert_eq!(
            failures,
            vec![HookFailure {
                stage: HookStage::LocalPreRun,
                step: "second example.com".into(),
                error: "boom".into(),
            }]
        );
    }

    #[test]
    fn step_stops_at_first_failing_command() {
        let runner = Arc::new(MockRunner::new().on("bad", Err("exit 2".into())));
        let scripts = ShellScriptRunner::new(runner.clone());
        let steps = vec![
            LocalStep { name: "report".into(), commands: vec!["bad".into(), "never".into()] },
            LocalStep { name: String::new(), commands: vec!["ok {{Workspace}}".into()] },
        ];
        let failures = run_local_steps(&scripts, &steps, &ctx());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, "report");
        assert_eq!(runner.executed_commands(), vec!["bad", "ok example.com"]);
    }

    #[test]
    fn remote_commands_are_resolved_and_best_effort() {
        let runner = Arc::new(MockRunner::new().on("mkdir", Err("Permission denied".into())));
        let exec = RemoteExecutor::new(runner.clone());
        let endpoint = SshEndpoint {
            user: "root".into(),
            host: "h".into(),
            port: 22,
            private_key: None,
            connect_timeout_secs: 5,
        };
        let failures = run_remote_commands(
            &exec,
            &endpoint,
            &["mkdir /x/{{Workspace}}".to_string(), "uptime".to_string()],
            &ctx(),
        );
        assert_eq!(runner.executed_commands().len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, HookStage::RemotePreRun);
        assert_eq!(failures[0].step, "mkdir /x/example.com");
    }
}
