//! Placeholder context and template resolution.
//!
//! A `PlaceholderContext` maps symbolic names (`Target`, `Workspace`,
//! `Output`, ...) to resolved strings. Command templates reference them as
//! `{{Name}}` or `{{.Name}}`. Templates are resolved immediately before each
//! execution because later lifecycle steps add keys.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::config::CloudConfig;


/// Key/value substitution environment for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderContext {
    values: BTreeMap<String, String>,
}

impl PlaceholderContext {
    pub fn new() -> Self {
        PlaceholderContext {
            values: BTreeMap::new(),
        }
    }

    /// Build the context for one scan target.
    ///
    /// `Workspace` comes from `workspace` when given, otherwise it is
    /// derived from the target.
    pub fn for_target(target: &str, workspace: Option<&str>, config: &CloudConfig) -> Self {
        let workspace = match workspace {
            Some(ws) if !ws.trim().is_empty() => ws.trim().to_string(),
            _ => derive_workspace(target),
        };
        let output = config.workspaces_dir.join(&workspace);

        let mut ctx = PlaceholderContext::new();
        ctx.insert("Target", target);
        ctx.insert("Workspace", &workspace);
        ctx.insert("Output", &output.to_string_lossy());
        ctx.insert("Workspaces", &config.workspaces_dir.to_string_lossy());
        ctx.insert("Binary", &config.product);
        ctx.insert("RemoteBase", &config.remote_base);
        ctx
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The `Target` value, or an empty string.
    pub fn target(&self) -> &str {
        self.get("Target").unwrap_or("")
    }

    /// The `Workspace` value, or an empty string.
    pub fn workspace(&self) -> &str {
        self.get("Workspace").unwrap_or("")
    }

    /// Substitute every known placeholder in `template`.
    ///
    /// Unknown placeholders are left verbatim. Substituted values are not
    /// scanned again, so expansion is a single pass.
    pub fn resolve(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after_open = &rest[open + 2..];
            let close = match after_open.find("}}") {
                Some(c) => c,
                None => {
                    out.push_str(&rest[open..]);
                    return out;
                }
            };
            let key = after_open[..close].trim().trim_start_matches('.').trim();
            match self.values.get(key) {
                Some(value) if !key.is_empty() => out.push_str(value),
                _ => out.push_str(&rest[open..open + 2 + close + 2]),
            }
            rest = &after_open[close + 2..];
        }
        out.push_str(rest);
        out
    }

    /// Merge user-supplied `key=value` parameters.
    ///
    /// Each value is resolved against the context as it stands before the
    /// insert, so a parameter may reference existing keys (one level).
    /// Returns the entries that were skipped because they were malformed.
    pub fn merge_params(&mut self, params: &[String]) -> Vec<String> {
        let mut skipped = Vec::new();
        for raw in params {
            match parse_param(raw) {
                Some((key, value)) => {
                    let resolved = self.resolve(value);
                    self.insert(key, &resolved);
                }
                None => {
                    warn!(param = %raw, "skipping malformed parameter, expected key=value");
                    skipped.push(raw.clone());
                }
            }
        }
        skipped
    }
}


/// Split `key=value` on the first `=`. The key must be non-empty.
pub fn parse_param(raw: &str) -> Option<(&str, &str)> {
    let (key, value) = raw.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}


/// Derive a workspace name from a target.
///
/// File-backed targets use their file name; anything else drops a URL
/// scheme and replaces path-hostile characters with `_`.
pub fn derive_workspace(target: &str) -> String {
    let target = target.trim();
    let path = Path::new(target);
    if path.is_file() {
        if let Some(name) = path.file_name() {
            return name.to_string_lossy().into_owned();
        }
    }

    let stripped = target
        .strip_prefix("https://")
        .or_else(|| target.strip_prefix("http://"))
        .unwrap_or(target)
        .trim_end_matches('/');

    stripped
        .chars()
        .map(|c| match c {
            '/' | ':' | ' ' | '\\' => '_',
            other => other,
        })
        .collect()
}
