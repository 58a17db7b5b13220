//! Provider backed by configured shell command templates.
//!
//! Each operation is a template from `ProviderSettings` (for example a
//! `doctl` or `linode-cli` invocation). `create` must print a JSON object
//! with `id` and `public_ip`; any text around the object is ignored.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use super::{InstanceSpec, Provider, ProviderAction};
use crate::context::PlaceholderContext;
use crate::infrastructure::runner::CommandRunner;
use crate::infrastructure::tmux::shell_escape;
use crate::rig::config::InstanceHandle;
use crate::types::config::{ProviderSettings, SshSettings};

#[derive(Debug, Deserialize)]
struct CreatedInstance {
    id: serde_json::Value,
    public_ip: String,
}

pub struct CommandProvider {
    runner: Arc<dyn CommandRunner>,
    settings: ProviderSettings,
    ssh: SshSettings,
}

impl CommandProvider {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: ProviderSettings, ssh: SshSettings) -> Self {
        CommandProvider { runner, settings, ssh }
    }

    fn render(&self, template: &str, what: &str, extra: &[(&str, &str)]) -> Result<String, String> {
        if template.trim().is_empty() {
            return Err(format!(
                "provider '{}' has no '{}' command configured",
                self.settings.name, what
            ));
        }
        let mut ctx = PlaceholderContext::new();
        ctx.insert("Image", &shell_escape(&self.settings.image));
        ctx.insert("Region", &shell_escape(&self.settings.region));
        ctx.insert("Size", &shell_escape(&self.settings.size));
        for (key, value) in extra {
            ctx.insert(key, &shell_escape(value));
        }
        Ok(ctx.resolve(template))
    }
}

impl Provider for CommandProvider {
    fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceHandle, String> {
        let cmd = self.render(
            &self.settings.create,
            "create",
            &[
                ("Name", spec.name.as_str()),
                ("Image", spec.image.as_str()),
                ("Region", spec.region.as_str()),
                ("Size", spec.size.as_str()),
            ],
        )?;
        let output = self.runner.run(&cmd)?;
        let created = parse_created(&output)?;
        let id = match created.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        info!(instance = %id, ip = %created.public_ip, name = %spec.name, "instance created");
        Ok(InstanceHandle::new(&id, &spec.name, &created.public_ip, &self.ssh))
    }

    fn delete_instance(&self, id: &str) -> Result<(), String> {
        let cmd = self.render(&self.settings.delete, "delete", &[("InstanceId", id)])?;
        self.runner.run(&cmd)?;
        info!(instance = %id, "instance deleted");
        Ok(())
    }

    fn action(&self, kind: ProviderAction, id: Option<&str>) -> Result<String, String> {
        let template = match kind {
            ProviderAction::BootInstance => &self.settings.boot,
            ProviderAction::RunImageBuild => &self.settings.build_image,
            ProviderAction::ListImages => &self.settings.list_images,
        };
        let mut extra = Vec::new();
        if let Some(id) = id {
            extra.push(("InstanceId", id));
        } else if kind == ProviderAction::BootInstance {
            return Err("boot requires an instance id".into());
        }
        let cmd = self.render(template, &kind.to_string(), &extra)?;
        self.runner.run(&cmd)
    }

    fn is_background_check(&self) -> bool {
        self.settings.background_check
    }
}

/// Extract the `{ id, public_ip }` object from `create` output.
fn parse_created(output: &str) -> Result<CreatedInstance, String> {
    let start = output.find('{');
    let end = output.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &output[s..=e],
        _ => return Err(format!("create printed no JSON object: {}", output.trim())),
    };
    let created: CreatedInstance =
        serde_json::from_str(json).map_err(|e| format!("invalid create output: {}", e))?;
    if created.public_ip.trim().is_empty() {
        return Err("create returned an empty public_ip".into());
    }
    Ok(created)
}
