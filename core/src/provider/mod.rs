//! Cloud provider capability.
//!
//! The orchestrator never talks to a cloud API directly. It goes through
//! `Provider`, which must be safe to call from every worker at once
//! (different workers create and delete different instances).

pub mod command;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rig::config::InstanceHandle;
use crate::types::config::ProviderSettings;


/// What to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    pub region: String,
    pub size: String,
}

impl InstanceSpec {
    /// Spec for a fresh instance named `<prefix>-<random suffix>`.
    pub fn new(prefix: &str, settings: &ProviderSettings) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        InstanceSpec {
            name: format!("{}-{}", prefix, &suffix[..8]),
            image: settings.image.clone(),
            region: settings.region.clone(),
            size: settings.size.clone(),
        }
    }
}

/// Provider operations other than create and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderAction {
    BootInstance,
    RunImageBuild,
    ListImages,
}

impl fmt::Display for ProviderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderAction::BootInstance => "boot",
            ProviderAction::RunImageBuild => "build_image",
            ProviderAction::ListImages => "list_images",
        };
        f.write_str(name)
    }
}

pub trait Provider: Send + Sync {
    fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceHandle, String>;

    fn delete_instance(&self, id: &str) -> Result<(), String>;

    /// Run `kind`, against instance `id` where the action needs one.
    fn action(&self, kind: ProviderAction, id: Option<&str>) -> Result<String, String>;

    /// Providers that only support background health checks do not get
    /// per-sync progress lines in the log.
    fn is_background_check(&self) -> bool {
        false
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_names_are_unique() {
        let settings = ProviderSettings {
            image: "scanner-v4".into(),
            region: "sfo3".into(),
            size: "s-2vcpu-4gb".into(),
            ..ProviderSettings::default()
        };
        let a = InstanceSpec::new("osmedeus", &settings);
        let b = InstanceSpec::new("osmedeus", &settings);
        assert!(a.name.starts_with("osmedeus-"));
        assert_eq!(a.name.len(), "osmedeus-".len() + 8);
        assert_ne!(a.name, b.name);
        assert_eq!(a.image, "scanner-v4");
    }

    #[test]
    fn action_display_matches_template_names() {
        assert_eq!(ProviderAction::BootInstance.to_string(), "boot");
        assert_eq!(ProviderAction::ListImages.to_string(), "list_images");
    }
}
