//! Test doubles for the orchestrator's collaborators.
//!
//! Each double records what was asked of it so scenario tests can assert
//! on call counts and order without any network or cloud account.

use std::sync::Mutex;

use crate::hooks::ScriptRunner;
use crate::provider::{InstanceSpec, Provider, ProviderAction};
use crate::rig::config::InstanceHandle;
use crate::types::config::SshSettings;
use crate::workflow::{HookPlan, WorkflowResolver, WorkflowSelector};


// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// Provider that hands out numbered fake instances.
///
/// Calls are recorded as `"create <name>"`, `"delete <id>"` and
/// `"<action> <id>"`.
pub struct MockProvider {
    calls: Mutex<Vec<String>>,
    next_id: Mutex<u32>,
    create_error: Option<String>,
    delete_error: Option<String>,
    background_check: bool,
    ssh: SshSettings,
}

impl MockProvider {
    pub fn new() -> Self {
        MockProvider {
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            create_error: None,
            delete_error: None,
            background_check: false,
            ssh: SshSettings::default(),
        }
    }

    /// Every create call fails with `error`.
    pub fn failing_create(mut self, error: &str) -> Self {
        self.create_error = Some(error.to_string());
        self
    }

    /// Every delete call fails with `error`.
    pub fn failing_delete(mut self, error: &str) -> Self {
        self.delete_error = Some(error.to_string());
        self
    }

    pub fn background_check(mut self, on: bool) -> Self {
        self.background_check = on;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for MockProvider {
    fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceHandle, String> {
        self.record(format!("create {}", spec.name));
        if let Some(ref e) = self.create_error {
            return Err(e.clone());
        }
        let mut next = lock(&self.next_id);
        let n = *next;
        *next += 1;
        let id = format!("mock-{}", n);
        let ip = format!("10.0.0.{}", n);
        Ok(InstanceHandle::new(&id, &spec.name, &ip, &self.ssh))
    }

    fn delete_instance(&self, id: &str) -> Result<(), String> {
        self.record(format!("delete {}", id));
        match self.delete_error {
            Some(ref e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn action(&self, kind: ProviderAction, id: Option<&str>) -> Result<String, String> {
        self.record(format!("{} {}", kind, id.unwrap_or("-")));
        Ok(String::new())
    }

    fn is_background_check(&self) -> bool {
        self.background_check
    }
}


// ---------------------------------------------------------------------------
// MockScriptRunner
// ---------------------------------------------------------------------------

/// Script runner that records scripts and fails those containing any of
/// the configured patterns.
pub struct MockScriptRunner {
    scripts: Mutex<Vec<String>>,
    fail_on: Vec<String>,
}

impl MockScriptRunner {
    pub fn new() -> Self {
        MockScriptRunner {
            scripts: Mutex::new(Vec::new()),
            fail_on: Vec::new(),
        }
    }

    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on.push(pattern.to_string());
        self
    }

    pub fn scripts(&self) -> Vec<String> {
        lock(&self.scripts).clone()
    }
}

impl Default for MockScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRunner for MockScriptRunner {
    fn run_script(&self, script: &str) -> Result<String, String> {
        lock(&self.scripts).push(script.to_string());
        if self.fail_on.iter().any(|p| script.contains(p.as_str())) {
            return Err(format!("script failed: {}", script));
        }
        Ok(String::new())
    }
}


// ---------------------------------------------------------------------------
// StaticResolver
// ---------------------------------------------------------------------------

/// Resolver that returns the same plan for every selector.
pub struct StaticResolver {
    plan: HookPlan,
}

impl StaticResolver {
    pub fn new(plan: HookPlan) -> Self {
        StaticResolver { plan }
    }
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new(HookPlan::default())
    }
}

impl WorkflowResolver for StaticResolver {
    fn resolve(&self, _selector: &WorkflowSelector) -> Result<HookPlan, String> {
        Ok(self.plan.clone())
    }
}


fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
