//! The plugin system facade.
//!
//! [`PluginSystem`] owns the registry, the permission evaluator, the executor
//! and the settings store. The launcher constructs one and passes it to
//! whatever needs to route input; there is no global instance.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{ConfigValue, HostConfig, Plugin, PluginConfig, ResultItem};
use tokio::sync::broadcast;

use crate::api::HostServices;
use crate::clipboard::{Clipboard, MemoryClipboard};
use crate::config_store::ConfigStore;
use crate::engine::{EngineFactory, EngineLimits};
use crate::events::{self, EventSender, PluginEvent};
use crate::executor::PluginExecutor;
use crate::loader;
use crate::network::{HttpClient, NetworkClient};
use crate::permission::{PermissionEvaluator, PermissionSummary};
use crate::registry::PluginRegistry;
use crate::types::{PluginError, PluginResult};

/// A plugin directory that could not be registered.
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub path: PathBuf,
    pub error: PluginError,
}

/// Outcome of [`PluginSystem::discover`].
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Names registered, in load order.
    pub loaded: Vec<String>,
    /// Directories that failed, with the reason.
    pub failed: Vec<DiscoveryFailure>,
}

impl DiscoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns every part of the plugin runtime.
pub struct PluginSystem {
    config: HostConfig,
    registry: PluginRegistry,
    permissions: PermissionEvaluator,
    executor: PluginExecutor,
    config_store: Arc<ConfigStore>,
    events: EventSender,
}

impl std::fmt::Debug for PluginSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSystem")
            .field("plugins", &self.registry.names())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl PluginSystem {
    /// Create a system with an in-memory clipboard and the reqwest client,
    /// whose response bodies share the `readFile` size cap.
    pub fn new(config: HostConfig) -> Self {
        let network = HttpClient::new(Duration::from_millis(config.network_timeout_ms))
            .with_max_body_size(config.max_read_size);
        Self::with_services(config, Arc::new(MemoryClipboard::new()), Arc::new(network))
    }

    /// Create a system with the launcher's own clipboard and network backends.
    pub fn with_services(
        config: HostConfig,
        clipboard: Arc<dyn Clipboard>,
        network: Arc<dyn NetworkClient>,
    ) -> Self {
        let config_store = Arc::new(ConfigStore::new(&config.config_root));
        let events = events::channel();
        let services = HostServices {
            config_store: config_store.clone(),
            clipboard,
            network,
            events: events.clone(),
            data_root: config.data_root.clone(),
            max_read_size: config.max_read_size,
        };
        let limits = EngineLimits {
            memory_limit: config.memory_limit,
        };

        Self {
            config,
            registry: PluginRegistry::new(),
            permissions: PermissionEvaluator::new(),
            executor: PluginExecutor::new(services, limits),
            config_store,
            events,
        }
    }

    /// Register an additional script engine.
    pub fn add_engine(&mut self, factory: Arc<dyn EngineFactory>) {
        self.executor.add_engine(factory);
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &PluginExecutor {
        &self.executor
    }

    pub fn permissions(&self) -> &PermissionEvaluator {
        &self.permissions
    }

    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.config_store
    }

    /// Receive result, notification and lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    // ---- loading -------------------------------------------------------

    /// Load and register every plugin under every configured directory.
    ///
    /// A failing plugin is recorded in the report and never stops the rest.
    pub fn discover(&mut self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let roots = self.config.plugin_dirs.clone();

        for root in &roots {
            let dirs = loader::scan_plugin_directories(root);
            tracing::debug!(root = %root.display(), count = dirs.len(), "Scanning plugin directory");

            for dir in dirs {
                match self.load_plugin(&dir) {
                    Ok(name) => report.loaded.push(name),
                    Err(error) => {
                        tracing::warn!(path = %dir.display(), error = %error, "Skipping plugin");
                        report.failed.push(DiscoveryFailure { path: dir, error });
                    }
                }
            }
        }

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Plugin discovery finished"
        );
        report
    }

    /// Load one plugin directory and register it. Returns the plugin name.
    pub fn load_plugin(&mut self, dir: impl AsRef<Path>) -> PluginResult<String> {
        let plugin = loader::load_plugin(dir)?;
        let name = plugin.name().to_string();
        self.register(plugin)?;
        Ok(name)
    }

    /// Validate and register an already loaded plugin.
    ///
    /// Replaces any plugin of the same name; a live instance of the old
    /// registration is destroyed so the next dispatch builds a fresh one.
    pub fn register(&mut self, plugin: Plugin) -> PluginResult<()> {
        let plugin = self.prepare(plugin)?;
        let name = plugin.name().to_string();
        self.executor.destroy_instance(&name);
        self.registry.register(plugin);
        Ok(())
    }

    /// Remove a plugin and its instance. Unknown names are ignored.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.executor.destroy_instance(name);
        self.registry.unregister(name).is_some()
    }

    /// Reload a plugin from its directory, keeping its enabled state and
    /// rebuilding its instance if one was live.
    pub fn reload_plugin(&mut self, name: &str) -> PluginResult<()> {
        let current = self.require(name)?;
        let had_instance = self.executor.has_instance(name);

        let mut plugin = loader::load_plugin(&current.url)?;
        plugin.is_enabled = current.is_enabled;
        if plugin.name() != name {
            return Err(PluginError::config(format!(
                "plugin at {} is now named '{}'",
                current.url.display(),
                plugin.name()
            )));
        }

        let plugin = self.prepare(plugin)?;
        self.executor.destroy_instance(name);
        self.registry.register(plugin);

        if had_instance {
            let fresh = self.require(name)?;
            self.executor.create_instance(fresh)?;
        }
        tracing::info!(plugin = %name, "Reloaded plugin");
        Ok(())
    }

    fn prepare(&self, mut plugin: Plugin) -> PluginResult<Plugin> {
        self.permissions.validate_permissions(&plugin)?;

        if !plugin.manifest.is_compatible_with(&self.config.app_version) {
            let manifest = &plugin.manifest;
            let required = format!(
                "{}..={}",
                manifest.min_app_version.as_deref().unwrap_or("*"),
                manifest.max_app_version.as_deref().unwrap_or("*")
            );
            return Err(PluginError::Incompatible {
                name: plugin.name().to_string(),
                required,
            });
        }

        if self.config.is_disabled(plugin.name()) {
            plugin.is_enabled = false;
        }

        let user = self.config_store.load_config(plugin.name())?;
        plugin.apply_user_config(&user);
        Ok(plugin)
    }

    fn require(&self, name: &str) -> PluginResult<Arc<Plugin>> {
        self.registry
            .get_plugin(name)
            .ok_or_else(|| PluginError::NotFound {
                name: name.to_string(),
            })
    }

    // ---- dispatch ------------------------------------------------------

    /// Plugin whose command trigger matches, ignoring ASCII case.
    pub fn find_plugin_by_command(&self, trigger: &str) -> Option<Arc<Plugin>> {
        self.registry.get_plugin_for_command(trigger)
    }

    /// Split a raw query into its plugin and the remaining text.
    pub fn match_input(&self, query: &str) -> Option<(Arc<Plugin>, String)> {
        self.registry.match_input(query)
    }

    /// Forward input to a plugin, creating its instance on first use.
    ///
    /// Disabled plugins ignore input. Errors only for an unknown plugin or
    /// when no instance can be built; script errors are logged.
    pub fn dispatch_input(&mut self, name: &str, text: &str) -> PluginResult<()> {
        let plugin = self.require(name)?;
        if !plugin.is_enabled {
            tracing::debug!(plugin = %name, "Input ignored for disabled plugin");
            return Ok(());
        }
        let instance = self.executor.create_instance(plugin)?;
        instance.handle_input(text);
        Ok(())
    }

    /// Forward an action to a plugin. `false` when unknown, disabled,
    /// unhandled or failing.
    pub fn dispatch_action(&mut self, name: &str, action_id: &str) -> bool {
        let Some(plugin) = self.registry.get_plugin(name) else {
            return false;
        };
        if !plugin.is_enabled {
            return false;
        }
        match self.executor.create_instance(plugin) {
            Ok(instance) => instance.execute_action(action_id),
            Err(e) => {
                tracing::warn!(plugin = %name, error = %e, "Cannot create instance for action");
                false
            }
        }
    }

    /// Current result list of a plugin's instance (empty without one).
    pub fn results(&self, name: &str) -> Vec<ResultItem> {
        self.executor
            .get_instance(name)
            .map(|instance| instance.results())
            .unwrap_or_default()
    }

    // ---- administration ------------------------------------------------

    pub fn enable_plugin(&mut self, name: &str) -> PluginResult<()> {
        self.toggle(name, true)
    }

    /// Disable a plugin. A live instance keeps running until the next
    /// dispatch, which is then ignored.
    pub fn disable_plugin(&mut self, name: &str) -> PluginResult<()> {
        self.toggle(name, false)
    }

    fn toggle(&mut self, name: &str, enabled: bool) -> PluginResult<()> {
        let found = if enabled {
            self.registry.enable_plugin(name)
        } else {
            self.registry.disable_plugin(name)
        };
        if found {
            Ok(())
        } else {
            Err(PluginError::NotFound {
                name: name.to_string(),
            })
        }
    }

    pub fn permission_summary(&self, name: &str) -> PluginResult<PermissionSummary> {
        let plugin = self.require(name)?;
        Ok(self.permissions.permission_summary(&plugin))
    }

    /// Effective settings of a registered plugin.
    pub fn plugin_config(&self, name: &str) -> PluginResult<PluginConfig> {
        Ok(self.require(name)?.effective_config.clone())
    }

    /// Persist one setting and refresh the plugin's effective config.
    pub fn set_config_value(&mut self, name: &str, key: &str, value: ConfigValue) -> PluginResult<()> {
        self.require(name)?;
        self.config_store.set_value(name, key, value)?;
        self.refresh_effective_config(name)
    }

    /// Drop all persisted settings, falling back to the shipped defaults.
    pub fn reset_config(&mut self, name: &str) -> PluginResult<()> {
        self.require(name)?;
        self.config_store.reset_config(name)?;
        self.refresh_effective_config(name)
    }

    fn refresh_effective_config(&mut self, name: &str) -> PluginResult<()> {
        let user = self.config_store.load_config(name)?;
        self.registry.update(name, |plugin| plugin.apply_user_config(&user));
        Ok(())
    }

    /// Destroy every instance.
    pub fn shutdown(&mut self) {
        tracing::info!(instances = self.executor.len(), "Shutting down plugin system");
        self.executor.destroy_all_instances();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_plugin(root: &Path, name: &str, extra: &str, script: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("manifest.yaml"),
            format!(
                "name: {name}\nversion: 1.0.0\ndisplayName: {name}\ndescription: d\ncommand: /{name}\n{extra}"
            ),
        )
        .unwrap();
        fs::write(dir.join("main.lua"), script).unwrap();
    }

    const ECHO: &str =
        "registerCallback(function(input) display({ { title = 'Received: ' .. input } }) end)";

    #[test]
    fn test_discover_reports_failures_without_aborting() {
        let temp = TempDir::new().unwrap();
        let config = HostConfig::rooted_at(temp.path());
        let plugins = &config.plugin_dirs[0];
        write_plugin(plugins, "good", "", ECHO);
        write_plugin(plugins, "empty", "", "   ");
        write_plugin(
            plugins,
            "badperm",
            "permissions:\n  - type: fileRead\n    directories: [relative]\n",
            ECHO,
        );
        write_plugin(plugins, "future", "minAppVersion: '99.0'\n", ECHO);

        let mut system = PluginSystem::new(config);
        let report = system.discover();

        assert_eq!(report.loaded, vec!["good"]);
        assert_eq!(report.failed.len(), 3);
        assert!(!report.is_clean());
        assert!(system.find_plugin_by_command("/good").is_some());
        assert!(system.find_plugin_by_command("/future").is_none());
    }

    #[test]
    fn test_disabled_by_config() {
        let temp = TempDir::new().unwrap();
        let config = HostConfig::rooted_at(temp.path()).disable_plugin("echo");
        write_plugin(&config.plugin_dirs[0], "echo", "", ECHO);

        let mut system = PluginSystem::new(config);
        system.discover();

        assert!(!system.registry().get_plugin("echo").unwrap().is_enabled);
        system.dispatch_input("echo", "hi").unwrap();
        assert!(!system.executor().has_instance("echo"));
        assert!(system.results("echo").is_empty());

        system.enable_plugin("echo").unwrap();
        system.dispatch_input("echo", "hi").unwrap();
        assert_eq!(system.results("echo")[0].title, "Received: hi");
    }

    #[test]
    fn test_unknown_plugin() {
        let temp = TempDir::new().unwrap();
        let mut system = PluginSystem::new(HostConfig::rooted_at(temp.path()));
        assert!(matches!(
            system.dispatch_input("ghost", "x"),
            Err(PluginError::NotFound { .. })
        ));
        assert!(!system.dispatch_action("ghost", "x"));
        assert!(system.disable_plugin("ghost").is_err());
        assert!(!system.unregister("ghost"));
    }

    #[test]
    fn test_reload_picks_up_new_script() {
        let temp = TempDir::new().unwrap();
        let config = HostConfig::rooted_at(temp.path());
        let root = config.plugin_dirs[0].clone();
        write_plugin(&root, "echo", "", ECHO);

        let mut system = PluginSystem::new(config);
        system.discover();
        system.dispatch_input("echo", "one").unwrap();
        let before = system.executor().get_instance("echo").unwrap();

        fs::write(
            root.join("echo/main.lua"),
            "registerCallback(function(input) display({ { title = 'v2: ' .. input } }) end)",
        )
        .unwrap();
        system.reload_plugin("echo").unwrap();

        let after = system.executor().get_instance("echo").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        system.dispatch_input("echo", "two").unwrap();
        assert_eq!(system.results("echo")[0].title, "v2: two");
    }

    #[test]
    fn test_config_updates_effective_config() {
        let temp = TempDir::new().unwrap();
        let config = HostConfig::rooted_at(temp.path());
        write_plugin(&config.plugin_dirs[0], "cfg", "", "x = 1");
        fs::write(
            config.plugin_dirs[0].join("cfg/config.yaml"),
            "limit:\n  type: int\n  value: 10\n",
        )
        .unwrap();

        let mut system = PluginSystem::new(config);
        system.discover();
        assert_eq!(
            system.plugin_config("cfg").unwrap().get("limit"),
            Some(&ConfigValue::Integer(10))
        );

        system
            .set_config_value("cfg", "limit", ConfigValue::Integer(3))
            .unwrap();
        assert_eq!(
            system.plugin_config("cfg").unwrap().get("limit"),
            Some(&ConfigValue::Integer(3))
        );

        system.reset_config("cfg").unwrap();
        assert_eq!(
            system.plugin_config("cfg").unwrap().get("limit"),
            Some(&ConfigValue::Integer(10))
        );
    }

    #[test]
    fn test_shutdown_destroys_instances() {
        let temp = TempDir::new().unwrap();
        let config = HostConfig::rooted_at(temp.path());
        write_plugin(&config.plugin_dirs[0], "a", "", ECHO);
        write_plugin(&config.plugin_dirs[0], "b", "", ECHO);

        let mut system = PluginSystem::new(config);
        system.discover();
        system.dispatch_input("a", "x").unwrap();
        system.dispatch_input("b", "x").unwrap();
        assert_eq!(system.executor().len(), 2);

        system.shutdown();
        assert!(system.executor().is_empty());
    }
}
