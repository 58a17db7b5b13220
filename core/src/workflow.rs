//! Workflow selection, hook plans and scan command synthesis.
//!
//! A scan runs one named flow or module. The resolver turns that name into
//! a `HookPlan`: ordered command templates to run on the instance before
//! the scan, locally before it, and locally after it. Templates stay
//! unresolved until the moment they run.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::config::{CloudConfig, ScanSettings};

/// Flow used when neither a flow nor a module is configured.
pub const DEFAULT_FLOW: &str = "general";


// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Flow,
    Module,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Flow => f.write_str("flow"),
            TaskKind::Module => f.write_str("module"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSelector {
    pub kind: TaskKind,
    pub name: String,
}

impl WorkflowSelector {
    /// A configured flow wins over a module.
    pub fn from_settings(scan: &ScanSettings) -> Self {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        if let Some(flow) = non_empty(&scan.flow) {
            WorkflowSelector { kind: TaskKind::Flow, name: flow }
        } else if let Some(module) = non_empty(&scan.module) {
            WorkflowSelector { kind: TaskKind::Module, name: module }
        } else {
            WorkflowSelector { kind: TaskKind::Flow, name: DEFAULT_FLOW.into() }
        }
    }
}


// ---------------------------------------------------------------------------
// Hook plan
// ---------------------------------------------------------------------------

/// A named local action with its command templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStep {
    pub name: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookPlan {
    pub remote_pre_run: Vec<String>,
    pub local_pre_run: Vec<String>,
    pub local_post_run: Vec<String>,
    pub local_steps: Vec<LocalStep>,
}

impl HookPlan {
    pub fn is_empty(&self) -> bool {
        self.remote_pre_run.is_empty()
            && self.local_pre_run.is_empty()
            && self.local_post_run.is_empty()
            && self.local_steps.is_empty()
    }
}

pub trait WorkflowResolver: Send + Sync {
    fn resolve(&self, selector: &WorkflowSelector) -> Result<HookPlan, String>;
}


// ---------------------------------------------------------------------------
// YamlWorkflowResolver
// ---------------------------------------------------------------------------

/// Reads `<dir>/flows/<name>.yaml` or `<dir>/modules/<name>.yaml`.
///
/// A workflow without a local definition has no hooks.
pub struct YamlWorkflowResolver {
    dir: PathBuf,
}

impl YamlWorkflowResolver {
    pub fn new(dir: &Path) -> Self {
        YamlWorkflowResolver {
            dir: dir.to_path_buf(),
        }
    }

    fn candidates(&self, selector: &WorkflowSelector) -> Vec<PathBuf> {
        let sub = match selector.kind {
            TaskKind::Flow => "flows",
            TaskKind::Module => "modules",
        };
        ["yaml", "yml"]
            .iter()
            .map(|ext| self.dir.join(sub).join(format!("{}.{}", selector.name, ext)))
            .collect()
    }
}

impl WorkflowResolver for YamlWorkflowResolver {
    fn resolve(&self, selector: &WorkflowSelector) -> Result<HookPlan, String> {
        if selector.name.contains('/') || selector.name.contains("..") {
            return Err(format!("invalid {} name '{}'", selector.kind, selector.name));
        }
        let path = match self.candidates(selector).into_iter().find(|p| p.is_file()) {
            Some(p) => p,
            None => {
                debug!(kind = %selector.kind, name = %selector.name, "no local workflow definition");
                return Ok(HookPlan::default());
            }
        };
        let content = fs::read_to_string(&path)
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        if content.trim().is_empty() {
            return Ok(HookPlan::default());
        }
        serde_yaml::from_str(&content).map_err(|e| format!("invalid workflow '{}': {}", path.display(), e))
    }
}

// ---------------------------------------------------------------------------
// Scan command
// ---------------------------------------------------------------------------

/// The scan command template for `config`, before placeholder resolution.
///
/// A raw command wins; otherwise the command is synthesized from the
/// selected flow or module. `target_is_list` passes the target with `-T`
/// as a file of targets instead of `-t`.
pub fn scan_command_template(config: &CloudConfig, target_is_list: bool) -> String {
    if let Some(raw) = config.scan.raw_command.as_ref().filter(|r| !r.trim().is_empty()) {
        return raw.clone();
    }

    let selector = WorkflowSelector::from_settings(&config.scan);
    let kind_flag = match selector.kind {
        TaskKind::Flow => "-f",
        TaskKind::Module => "-m",
    };
    let target_flag = if target_is_list { "-T" } else { "-t" };

    let mut cmd = format!(
        "{} scan {} {} {} {{{{Target}}}} -w {{{{Workspace}}}}",
        config.product, kind_flag, selector.name, target_flag
    );
    if config.scan.remote_threads > 1 {
        cmd.push_str(&format!(" -c {}", config.scan.remote_threads));
    }
    if let Some(extra) = config.scan.extra.as_ref().filter(|e| !e.trim().is_empty()) {
        cmd.push(' ');
        cmd.push_str(extra.trim());
    }
    cmd
}
