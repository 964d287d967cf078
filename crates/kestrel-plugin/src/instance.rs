//! Live execution instance of one plugin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use kestrel_core::{Plugin, ResultItem, Value};

use crate::api::{HostApi, HostServices};
use crate::engine::{EngineFactory, EngineLimits, ScriptEngine};
use crate::types::PluginResult;

/// One isolated script context plus the state it produces.
///
/// The context is built by [`setup_context`](Self::setup_context) and torn
/// down by [`cleanup`](Self::cleanup). Dispatch on a disabled or torn-down
/// instance is a no-op.
pub struct PluginInstance {
    plugin: Arc<Plugin>,
    engine: Mutex<Option<Box<dyn ScriptEngine>>>,
    api: Mutex<Option<HostApi>>,
    results: Arc<Mutex<Vec<ResultItem>>>,
    enabled: AtomicBool,
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("plugin", &self.plugin.name())
            .field("has_context", &self.has_context())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl PluginInstance {
    /// Create an instance with no context yet.
    pub fn new(plugin: Arc<Plugin>) -> Self {
        Self {
            plugin,
            engine: Mutex::new(None),
            api: Mutex::new(None),
            results: Arc::default(),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.plugin
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    /// Build a fresh context, inject the host API and run the entry script.
    ///
    /// A script that throws still leaves a usable context; it simply has no
    /// registered callbacks. Only failing to create the context is an error.
    pub fn setup_context(
        &self,
        factory: &dyn EngineFactory,
        services: HostServices,
        limits: EngineLimits,
    ) -> PluginResult<()> {
        self.cleanup();

        let api = HostApi::new(self.plugin.clone(), services, self.results.clone());
        let mut engine = factory.create(api.clone(), limits)?;

        let chunk_name = format!("{}/{}", self.plugin.name(), self.plugin.manifest.main);
        if let Err(e) = engine.load_script(&chunk_name, &self.plugin.script) {
            tracing::warn!(plugin = %self.name(), error = %e, "Plugin script failed during load");
        }

        tracing::debug!(
            plugin = %self.name(),
            engine = engine.name(),
            callback = engine.has_callback(),
            action_handler = engine.has_action_handler(),
            "Context ready"
        );

        *lock(&self.api) = Some(api);
        *lock(&self.engine) = Some(engine);
        Ok(())
    }

    /// Forward input to the registered callback.
    pub fn handle_input(&self, text: &str) {
        if !self.is_enabled() {
            return;
        }
        let mut engine = lock(&self.engine);
        let Some(engine) = engine.as_mut() else {
            return;
        };
        if let Err(e) = engine.call_registered_callback(text) {
            tracing::warn!(plugin = %self.name(), error = %e, "Input callback failed");
        }
    }

    /// Forward an action to the registered handler. `false` when disabled,
    /// unregistered or when the handler throws.
    pub fn execute_action(&self, action_id: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut engine = lock(&self.engine);
        let Some(engine) = engine.as_mut() else {
            return false;
        };
        match engine.call_registered_handler(action_id) {
            Ok(handled) => handled.unwrap_or(false),
            Err(e) => {
                tracing::warn!(plugin = %self.name(), action = action_id, error = %e, "Action handler failed");
                false
            }
        }
    }

    /// Release the context, revoke the API and clear results.
    pub fn cleanup(&self) {
        if let Some(api) = lock(&self.api).take() {
            api.revoke();
        }
        lock(&self.engine).take();
        lock(&self.results).clear();
    }

    /// Snapshot of the current result list.
    pub fn results(&self) -> Vec<ResultItem> {
        lock(&self.results).clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn has_context(&self) -> bool {
        lock(&self.engine).is_some()
    }

    pub fn has_callback(&self) -> bool {
        lock(&self.engine).as_ref().is_some_and(|e| e.has_callback())
    }

    pub fn has_action_handler(&self) -> bool {
        lock(&self.engine)
            .as_ref()
            .is_some_and(|e| e.has_action_handler())
    }

    /// Read a script global from the context; `Null` without a context.
    pub fn script_global(&self, name: &str) -> PluginResult<Value> {
        match lock(&self.engine).as_ref() {
            Some(engine) => engine.get_global(name),
            None => Ok(Value::Null),
        }
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        if let Some(api) = lock(&self.api).take() {
            api.revoke();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use kestrel_core::Manifest;
    use tempfile::TempDir;

    use super::*;
    use crate::api::tests::services;
    use crate::lua::LuaEngineFactory;

    fn instance(script: &str) -> PluginInstance {
        let manifest = Manifest::from_yaml(
            "name: inst\nversion: '1'\ndisplayName: I\ndescription: d\ncommand: /inst\n",
        )
        .unwrap();
        PluginInstance::new(Arc::new(Plugin::new("/plugins/inst", manifest, script)))
    }

    const ECHO: &str = r#"
registerCallback(function(input)
    display({ { title = "Received: " .. input } })
end)
registerActionHandler(function(id) return id == "go" end)
"#;

    #[test]
    fn test_dispatch_after_setup() {
        let temp = TempDir::new().unwrap();
        let inst = instance(ECHO);
        inst.setup_context(&LuaEngineFactory, services(temp.path()), EngineLimits::default())
            .unwrap();

        inst.handle_input("hello world");
        let results = inst.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Received: hello world");
        assert!(inst.execute_action("go"));
        assert!(!inst.execute_action("stop"));
    }

    #[test]
    fn test_disabled_instance_is_inert() {
        let temp = TempDir::new().unwrap();
        let inst = instance(ECHO);
        inst.setup_context(&LuaEngineFactory, services(temp.path()), EngineLimits::default())
            .unwrap();
        inst.set_enabled(false);

        inst.handle_input("ignored");
        assert!(inst.results().is_empty());
        assert!(!inst.execute_action("go"));

        inst.set_enabled(true);
        assert!(inst.execute_action("go"));
    }

    #[test]
    fn test_broken_script_still_creates_context() {
        let temp = TempDir::new().unwrap();
        let inst = instance("error('broken on purpose')");
        inst.setup_context(&LuaEngineFactory, services(temp.path()), EngineLimits::default())
            .unwrap();

        assert!(inst.has_context());
        assert!(!inst.has_callback());
        inst.handle_input("x");
        assert!(inst.results().is_empty());
        assert!(!inst.execute_action("x"));
    }

    #[test]
    fn test_throwing_handler_returns_false() {
        let temp = TempDir::new().unwrap();
        let inst = instance("registerActionHandler(function(id) error('nope') end)");
        inst.setup_context(&LuaEngineFactory, services(temp.path()), EngineLimits::default())
            .unwrap();
        assert!(inst.has_action_handler());
        assert!(!inst.execute_action("x"));
    }

    #[test]
    fn test_cleanup_clears_everything() {
        let temp = TempDir::new().unwrap();
        let inst = instance(ECHO);
        inst.setup_context(&LuaEngineFactory, services(temp.path()), EngineLimits::default())
            .unwrap();
        inst.handle_input("x");
        assert_eq!(inst.results().len(), 1);

        inst.cleanup();
        assert!(!inst.has_context());
        assert!(!inst.has_callback());
        assert!(inst.results().is_empty());
        assert!(!inst.execute_action("go"));
        assert_eq!(inst.script_global("anything").unwrap(), Value::Null);
    }

    #[test]
    fn test_no_context_dispatch_is_noop() {
        let inst = instance(ECHO);
        inst.handle_input("x");
        assert!(!inst.execute_action("go"));
        assert!(!inst.has_context());
    }
}
