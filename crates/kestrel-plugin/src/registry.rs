//! In-memory plugin registry.

use std::sync::Arc;

use indexmap::IndexMap;
use kestrel_core::Plugin;

/// Loaded plugins keyed by name, in registration order.
///
/// Plugins are stored behind `Arc` so instances can keep the snapshot they
/// were created from. Toggling a flag produces a new snapshot and never
/// touches a live instance.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: IndexMap<String, Arc<Plugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a plugin by name. Returns the previous registration.
    pub fn register(&mut self, plugin: Plugin) -> Option<Arc<Plugin>> {
        let name = plugin.name().to_string();

        if let Some(other) = self
            .plugins
            .values()
            .find(|p| p.name() != name && p.matches_command(plugin.command()))
        {
            tracing::warn!(
                plugin = %name,
                other = %other.name(),
                command = %plugin.command(),
                "Command trigger already used by another plugin"
            );
        }

        let previous = self.plugins.shift_remove(&name);
        tracing::info!(
            plugin = %name,
            command = %plugin.command(),
            replaced = previous.is_some(),
            "Registered plugin"
        );
        self.plugins.insert(name, Arc::new(plugin));
        previous
    }

    /// Remove a plugin. Absent names are ignored.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<Plugin>> {
        let removed = self.plugins.shift_remove(name);
        if removed.is_some() {
            tracing::info!(plugin = %name, "Unregistered plugin");
        }
        removed
    }

    /// Look up a plugin by name.
    pub fn get_plugin(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins.get(name).cloned()
    }

    /// Look up a plugin by command trigger, ignoring ASCII case.
    ///
    /// When two plugins share a trigger the most recently registered wins.
    pub fn get_plugin_for_command(&self, trigger: &str) -> Option<Arc<Plugin>> {
        self.plugins
            .values()
            .rev()
            .find(|p| p.matches_command(trigger))
            .cloned()
    }

    /// Split a raw launcher query into the plugin whose trigger leads it and
    /// the remaining text.
    ///
    /// `"/calc 1+1"` yields the `/calc` plugin and `"1+1"`. A bare trigger
    /// yields an empty remainder.
    pub fn match_input(&self, query: &str) -> Option<(Arc<Plugin>, String)> {
        let query = query.trim_start();
        let (trigger, rest) = match query.split_once(char::is_whitespace) {
            Some((trigger, rest)) => (trigger, rest.trim_start()),
            None => (query, ""),
        };
        if trigger.is_empty() {
            return None;
        }
        self.get_plugin_for_command(trigger)
            .map(|plugin| (plugin, rest.to_string()))
    }

    /// Plugins whose enabled flag is set, in registration order.
    pub fn get_enabled_plugins(&self) -> Vec<Arc<Plugin>> {
        self.plugins
            .values()
            .filter(|p| p.is_enabled)
            .cloned()
            .collect()
    }

    /// Set a plugin's enabled flag. Returns `false` if the name is unknown.
    pub fn enable_plugin(&mut self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    /// Clear a plugin's enabled flag. Returns `false` if the name is unknown.
    pub fn disable_plugin(&mut self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.plugins.get_mut(name) {
            Some(plugin) => {
                Arc::make_mut(plugin).is_enabled = enabled;
                tracing::debug!(plugin = %name, enabled, "Plugin toggled");
                true
            }
            None => false,
        }
    }

    /// Replace a registered plugin's snapshot in place, keeping its position.
    pub(crate) fn update<F>(&mut self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut Plugin),
    {
        match self.plugins.get_mut(name) {
            Some(plugin) => {
                f(Arc::make_mut(plugin));
                true
            }
            None => false,
        }
    }

    /// All plugins in registration order.
    pub fn plugins(&self) -> impl Iterator<Item = &Arc<Plugin>> {
        self.plugins.values()
    }

    /// Registered plugin names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use kestrel_core::Manifest;

    use super::*;

    fn plugin(name: &str, command: &str, script: &str) -> Plugin {
        let manifest = Manifest::from_yaml(&format!(
            "name: {name}\nversion: '1'\ndisplayName: {name}\ndescription: d\ncommand: {command}\n"
        ))
        .unwrap();
        Plugin::new(format!("/plugins/{name}"), manifest, script)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("calc", "/calc", "a"));
        registry.register(plugin("notes", "/note", "b"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get_plugin("calc").unwrap().command(), "/calc");
        assert_eq!(registry.get_plugin_for_command("/NOTE").unwrap().name(), "notes");
        assert!(registry.get_plugin_for_command("/missing").is_none());
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut registry = PluginRegistry::new();
        assert!(registry.register(plugin("calc", "/calc", "v1")).is_none());
        let previous = registry.register(plugin("calc", "/calc", "v2"));

        assert_eq!(previous.unwrap().script, "v1");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_plugin("calc").unwrap().script, "v2");
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("calc", "/calc", "a"));
        assert!(registry.unregister("missing").is_none());
        assert!(registry.unregister("calc").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shared_command_last_registration_wins() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("first", "/go", "a"));
        registry.register(plugin("second", "/go", "b"));
        assert_eq!(registry.get_plugin_for_command("/go").unwrap().name(), "second");
    }

    #[test]
    fn test_enable_disable_does_not_mutate_snapshots() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("calc", "/calc", "a"));
        let snapshot = registry.get_plugin("calc").unwrap();

        assert!(registry.disable_plugin("calc"));
        assert!(!registry.get_plugin("calc").unwrap().is_enabled);
        assert!(snapshot.is_enabled);
        assert!(registry.get_enabled_plugins().is_empty());

        assert!(registry.enable_plugin("calc"));
        assert_eq!(registry.get_enabled_plugins().len(), 1);
        assert!(!registry.enable_plugin("missing"));
    }

    #[test]
    fn test_match_input() {
        let mut registry = PluginRegistry::new();
        registry.register(plugin("calc", "/calc", "a"));

        let (found, rest) = registry.match_input("/calc  1 + 1").unwrap();
        assert_eq!(found.name(), "calc");
        assert_eq!(rest, "1 + 1");

        let (_, rest) = registry.match_input("/Calc").unwrap();
        assert_eq!(rest, "");

        assert!(registry.match_input("/calculator 2").is_none());
        assert!(registry.match_input("   ").is_none());
    }
}
