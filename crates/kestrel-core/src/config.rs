//! Host-side configuration for the plugin system.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for the plugin host.
///
/// Can be built in code or read from a TOML file:
///
/// ```toml
/// plugin_dirs = ["/home/me/.config/kestrel/plugins"]
/// data_root = "/home/me/.local/share/kestrel/plugin-data"
/// config_root = "/home/me/.config/kestrel/plugin-config"
/// disabled_plugins = ["noisy"]
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct HostConfig {
    /// Directories scanned for plugins.
    #[builder(default = "vec![default_base(dirs::config_dir()).join(\"plugins\")]")]
    pub plugin_dirs: Vec<PathBuf>,

    /// Shared root under which every plugin gets a private data directory.
    #[builder(default = "default_base(dirs::data_dir()).join(\"plugin-data\")")]
    pub data_root: PathBuf,

    /// Directory holding each plugin's persisted settings.
    #[builder(default = "default_base(dirs::config_dir()).join(\"plugin-config\")")]
    pub config_root: PathBuf,

    /// Host version checked against manifest compatibility bounds.
    #[builder(default = "env!(\"CARGO_PKG_VERSION\").to_string()")]
    pub app_version: String,

    /// Memory ceiling per script context in bytes (0 = unlimited).
    #[builder(default = "64 * 1024 * 1024")]
    pub memory_limit: usize,

    /// Maximum number of bytes `readFile` returns.
    #[builder(default = "10 * 1024 * 1024")]
    pub max_read_size: usize,

    /// Timeout for `networkRequest` in milliseconds.
    #[builder(default = "10_000")]
    pub network_timeout_ms: u64,

    /// Plugins that are registered disabled.
    #[builder(default)]
    pub disabled_plugins: HashSet<String>,
}

fn default_base(dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| PathBuf::from(".")).join("kestrel")
}

impl HostConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref root) = self.data_root {
            if root.as_os_str().is_empty() {
                return Err("Data root cannot be empty".to_string());
            }
        }
        if let Some(ref root) = self.config_root {
            if root.as_os_str().is_empty() {
                return Err("Config root cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        let config_base = default_base(dirs::config_dir());
        Self {
            plugin_dirs: vec![config_base.join("plugins")],
            data_root: default_base(dirs::data_dir()).join("plugin-data"),
            config_root: config_base.join("plugin-config"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            memory_limit: 64 * 1024 * 1024,
            max_read_size: 10 * 1024 * 1024,
            network_timeout_ms: 10_000,
            disabled_plugins: HashSet::new(),
        }
    }
}

impl HostConfig {
    /// Create a new config builder.
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::default()
    }

    /// Create a config rooted in a single base directory.
    ///
    /// Plugins live in `<base>/plugins`, data in `<base>/data`, settings in
    /// `<base>/config`. Handy for tests and portable installs.
    pub fn rooted_at(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            plugin_dirs: vec![base.join("plugins")],
            data_root: base.join("data"),
            config_root: base.join("config"),
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing keys fall back to the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Read a TOML file.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Disable a specific plugin.
    pub fn disable_plugin(mut self, name: impl Into<String>) -> Self {
        self.disabled_plugins.insert(name.into());
        self
    }

    /// Check if a plugin is disabled by configuration.
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled_plugins.contains(name)
    }

    /// Private data directory for a plugin.
    pub fn data_dir_for(&self, plugin: &str) -> PathBuf {
        self.data_root.join(plugin)
    }
}
