//! Execution instance lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_core::Plugin;

use crate::api::HostServices;
use crate::engine::{self, EngineFactory, EngineLimits};
use crate::events::{self, PluginEvent};
use crate::instance::PluginInstance;
use crate::types::{PluginError, PluginResult};

/// Creates, caches and destroys execution instances.
///
/// Holds at most one instance per plugin name.
pub struct PluginExecutor {
    instances: HashMap<String, Arc<PluginInstance>>,
    factories: Vec<Arc<dyn EngineFactory>>,
    services: HostServices,
    limits: EngineLimits,
}

impl std::fmt::Debug for PluginExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginExecutor")
            .field("instances", &self.instance_names())
            .field(
                "engines",
                &self.factories.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .field("limits", &self.limits)
            .finish()
    }
}

impl PluginExecutor {
    /// Create an executor with the built-in engines.
    pub fn new(services: HostServices, limits: EngineLimits) -> Self {
        Self {
            instances: HashMap::new(),
            factories: engine::default_factories(),
            services,
            limits,
        }
    }

    /// Register an additional engine. Later registrations take precedence.
    pub fn add_engine(&mut self, factory: Arc<dyn EngineFactory>) {
        self.factories.insert(0, factory);
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Return the live instance for this plugin, creating it if needed.
    ///
    /// Creating an instance builds its context and runs the entry script once.
    /// Fails only when no engine handles the entry script or the context
    /// cannot be built.
    pub fn create_instance(&mut self, plugin: Arc<Plugin>) -> PluginResult<Arc<PluginInstance>> {
        if let Some(existing) = self.instances.get(plugin.name()) {
            return Ok(existing.clone());
        }

        let entry = plugin.entry_path();
        let factory = engine::select_factory(&self.factories, &entry)
            .cloned()
            .ok_or_else(|| PluginError::EngineUnavailable {
                entry: entry.display().to_string(),
            })?;

        let instance = Arc::new(PluginInstance::new(plugin.clone()));
        instance.setup_context(factory.as_ref(), self.services.clone(), self.limits)?;

        let name = plugin.name().to_string();
        self.instances.insert(name.clone(), instance.clone());
        tracing::info!(plugin = %name, engine = factory.name(), "Created plugin instance");
        events::emit(&self.services.events, PluginEvent::InstanceCreated { plugin: name });

        Ok(instance)
    }

    pub fn get_instance(&self, name: &str) -> Option<Arc<PluginInstance>> {
        self.instances.get(name).cloned()
    }

    pub fn has_instance(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Tear down and forget an instance. Unknown names are ignored.
    pub fn destroy_instance(&mut self, name: &str) -> bool {
        let Some(instance) = self.instances.remove(name) else {
            return false;
        };
        instance.cleanup();
        tracing::info!(plugin = %name, "Destroyed plugin instance");
        events::emit(
            &self.services.events,
            PluginEvent::InstanceDestroyed {
                plugin: name.to_string(),
            },
        );
        true
    }

    /// Tear down every instance.
    pub fn destroy_all_instances(&mut self) {
        let mut names = self.instance_names();
        names.sort();
        for name in names {
            self.destroy_instance(&name);
        }
    }

    /// Destroy then create, yielding a context that shares nothing with the
    /// previous one.
    pub fn recreate_instance(&mut self, plugin: Arc<Plugin>) -> PluginResult<Arc<PluginInstance>> {
        self.destroy_instance(plugin.name());
        tracing::debug!(plugin = %plugin.name(), "Recreating plugin instance");
        self.create_instance(plugin)
    }

    pub fn instance_names(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Drop for PluginExecutor {
    fn drop(&mut self) {
        for instance in self.instances.values() {
            instance.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use kestrel_core::{Manifest, Value};
    use tempfile::TempDir;

    use super::*;
    use crate::api::tests::services;

    fn plugin(name: &str, main: &str, script: &str) -> Arc<Plugin> {
        let manifest = Manifest::from_yaml(&format!(
            "name: {name}\nversion: '1'\ndisplayName: {name}\ndescription: d\ncommand: /{name}\nmain: {main}\n"
        ))
        .unwrap();
        Arc::new(Plugin::new(format!("/plugins/{name}"), manifest, script))
    }

    #[test]
    fn test_create_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut executor = PluginExecutor::new(services(temp.path()), EngineLimits::default());
        let p = plugin("one", "main.lua", "x = 1");

        let first = executor.create_instance(p.clone()).unwrap();
        let second = executor.create_instance(p).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(executor.len(), 1);
    }

    #[test]
    fn test_recreate_drops_script_state() {
        let temp = TempDir::new().unwrap();
        let mut executor = PluginExecutor::new(services(temp.path()), EngineLimits::default());
        let p = plugin(
            "stateful",
            "main.lua",
            "registerCallback(function(input) leaked = input end)",
        );

        let first = executor.create_instance(p.clone()).unwrap();
        first.handle_input("secret");
        assert_eq!(first.script_global("leaked").unwrap(), Value::from("secret"));

        let second = executor.recreate_instance(p).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.script_global("leaked").unwrap(), Value::Null);
        assert!(!first.has_context());
    }

    #[test]
    fn test_destroy_all() {
        let temp = TempDir::new().unwrap();
        let mut executor = PluginExecutor::new(services(temp.path()), EngineLimits::default());
        for name in ["a", "b", "c"] {
            executor.create_instance(plugin(name, "main.lua", "x = 1")).unwrap();
        }

        assert!(!executor.destroy_instance("missing"));
        executor.destroy_all_instances();
        for name in ["a", "b", "c"] {
            assert!(!executor.has_instance(name));
        }
        assert!(executor.is_empty());
    }

    #[test]
    fn test_unknown_engine() {
        let temp = TempDir::new().unwrap();
        let mut executor = PluginExecutor::new(services(temp.path()), EngineLimits::default());
        let err = executor
            .create_instance(plugin("js", "main.js", "1"))
            .unwrap_err();
        assert!(matches!(err, PluginError::EngineUnavailable { .. }));
        assert!(!executor.has_instance("js"));
    }

    #[test]
    fn test_instances_are_isolated() {
        let temp = TempDir::new().unwrap();
        let mut executor = PluginExecutor::new(services(temp.path()), EngineLimits::default());
        let a = executor
            .create_instance(plugin("a", "main.lua", "shared = 'from a'"))
            .unwrap();
        let b = executor
            .create_instance(plugin("b", "main.lua", "shared = shared or 'from b'"))
            .unwrap();

        assert_eq!(a.script_global("shared").unwrap(), Value::from("from a"));
        assert_eq!(b.script_global("shared").unwrap(), Value::from("from b"));
    }

    #[test]
    fn test_lifecycle_events() {
        let temp = TempDir::new().unwrap();
        let services = services(temp.path());
        let mut rx = services.events.subscribe();
        let mut executor = PluginExecutor::new(services, EngineLimits::default());

        executor.create_instance(plugin("ev", "main.rhai", "let x = 1;")).unwrap();
        executor.destroy_instance("ev");

        assert_eq!(
            rx.try_recv().unwrap(),
            PluginEvent::InstanceCreated { plugin: "ev".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PluginEvent::InstanceDestroyed { plugin: "ev".into() }
        );
    }
}
