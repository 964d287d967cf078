//! Loaded plugin representation.

use std::path::PathBuf;

use crate::manifest::{Manifest, PermissionSpec};
use crate::settings::PluginConfig;

/// A plugin that has been read from disk and validated.
///
/// The registry is the single owner; execution instances hold their own
/// snapshot through an `Arc`.
#[derive(Debug, Clone)]
pub struct Plugin {
    /// Directory the plugin was loaded from.
    pub url: PathBuf,

    /// Parsed manifest.
    pub manifest: Manifest,

    /// Source text of the entry script.
    pub script: String,

    /// Defaults shipped in the plugin's own `config.yaml`.
    pub default_config: PluginConfig,

    /// Defaults overlaid with the user's persisted values.
    pub effective_config: PluginConfig,

    /// Whether the launcher should route input to this plugin.
    pub is_enabled: bool,
}

impl Plugin {
    /// Create an enabled plugin with no configuration.
    pub fn new(url: impl Into<PathBuf>, manifest: Manifest, script: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            manifest,
            script: script.into(),
            default_config: PluginConfig::default(),
            effective_config: PluginConfig::default(),
            is_enabled: true,
        }
    }

    /// Set the shipped defaults (also resets the effective config).
    pub fn with_default_config(mut self, defaults: PluginConfig) -> Self {
        self.effective_config = defaults.clone();
        self.default_config = defaults;
        self
    }

    /// Recompute the effective config from defaults and user values.
    pub fn apply_user_config(&mut self, user: &PluginConfig) {
        self.effective_config = self.default_config.merged(user);
    }

    /// Unique plugin name.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Command trigger.
    pub fn command(&self) -> &str {
        &self.manifest.command
    }

    /// Declared permissions (empty when none were declared).
    pub fn permissions(&self) -> &[PermissionSpec] {
        self.manifest.permission_specs()
    }

    /// Path of the entry script.
    pub fn entry_path(&self) -> PathBuf {
        self.url.join(&self.manifest.main)
    }

    /// Whether `trigger` selects this plugin. Matching ignores ASCII case.
    pub fn matches_command(&self, trigger: &str) -> bool {
        self.manifest.command.eq_ignore_ascii_case(trigger.trim())
    }
}
