//! Script engine abstraction.
//!
//! An engine owns one isolated script context. It evaluates the entry script,
//! remembers the input callback and action handler the script registers, and
//! invokes them on request. Engines hold no permission logic: every injected
//! host function forwards to a [`HostApi`], which decides.

use std::path::Path;
use std::sync::Arc;

use kestrel_core::Value;

use crate::api::HostApi;
use crate::types::PluginResult;

/// Resource limits applied to every new context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Memory ceiling in bytes for engines that support one (0 = unlimited).
    pub memory_limit: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
        }
    }
}

/// One isolated script context.
pub trait ScriptEngine: Send {
    /// Engine name (e.g. "lua", "rhai").
    fn name(&self) -> &'static str;

    /// Evaluate the entry script once. `chunk_name` appears in error messages.
    fn load_script(&mut self, chunk_name: &str, source: &str) -> PluginResult<()>;

    /// Whether the script registered an input callback.
    fn has_callback(&self) -> bool;

    /// Whether the script registered an action handler.
    fn has_action_handler(&self) -> bool;

    /// Invoke the input callback. Returns `Ok(false)` when none is registered.
    fn call_registered_callback(&mut self, input: &str) -> PluginResult<bool>;

    /// Invoke the action handler. Returns `Ok(None)` when none is registered;
    /// a non-boolean return value counts as `false`.
    fn call_registered_handler(&mut self, action_id: &str) -> PluginResult<Option<bool>>;

    /// Read a script global. Missing globals are `Value::Null`.
    fn get_global(&self, name: &str) -> PluginResult<Value>;
}

/// Builds script contexts for one language.
pub trait EngineFactory: Send + Sync {
    /// Engine name.
    fn name(&self) -> &'static str;

    /// Entry-file extensions handled, with leading dot (e.g. `[".lua"]`).
    fn file_extensions(&self) -> &'static [&'static str];

    /// Create a fresh context with the host API injected.
    fn create(&self, api: HostApi, limits: EngineLimits) -> PluginResult<Box<dyn ScriptEngine>>;

    /// Whether this factory handles the given entry script.
    fn handles(&self, entry: &Path) -> bool {
        let Some(ext) = entry.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.file_extensions()
            .iter()
            .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// Pick the first factory that handles `entry`.
pub fn select_factory<'a>(
    factories: &'a [Arc<dyn EngineFactory>],
    entry: &Path,
) -> Option<&'a Arc<dyn EngineFactory>> {
    factories.iter().find(|factory| factory.handles(entry))
}

/// The built-in engines: Lua first, then Rhai.
pub fn default_factories() -> Vec<Arc<dyn EngineFactory>> {
    vec![
        Arc::new(crate::lua::LuaEngineFactory),
        Arc::new(crate::rhai::RhaiEngineFactory),
    ]
}
