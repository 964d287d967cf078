//! Lua 5.4 script engine.

use mlua::{Function, Lua, Value as LuaValue};

use kestrel_core::Value;

use crate::api::HostApi;
use crate::engine::{EngineFactory, EngineLimits, ScriptEngine};
use crate::types::{PluginError, PluginResult};

use super::bindings::{self, ACTION_KEY, CALLBACK_KEY};

/// Globals removed from every context before the host API is installed.
const REMOVED_GLOBALS: &[&str] = &[
    "os", "io", "debug", "load", "loadfile", "dofile", "require", "package",
];

/// A single isolated Lua state bound to one plugin.
pub struct LuaEngine {
    lua: Lua,
    plugin: String,
}

impl LuaEngine {
    /// Create a hardened state with the host API installed.
    pub fn new(api: HostApi, limits: EngineLimits) -> PluginResult<Self> {
        let plugin = api.plugin_name().to_string();
        let lua = Lua::new();
        let engine_err = |e: mlua::Error| PluginError::engine(plugin.clone(), e);

        if limits.memory_limit > 0 {
            lua.set_memory_limit(limits.memory_limit).map_err(engine_err)?;
        }

        let globals = lua.globals();
        for name in REMOVED_GLOBALS {
            globals.set(*name, LuaValue::Nil).map_err(engine_err)?;
        }
        bindings::install_host_api(&lua, &api).map_err(engine_err)?;

        Ok(Self { lua, plugin })
    }

    fn registered(&self, key: &str) -> Option<Function> {
        self.lua
            .named_registry_value::<Option<Function>>(key)
            .ok()
            .flatten()
    }

    fn script_err(&self, e: mlua::Error) -> PluginError {
        PluginError::script(self.plugin.clone(), e)
    }
}

impl ScriptEngine for LuaEngine {
    fn name(&self) -> &'static str {
        "lua"
    }

    fn load_script(&mut self, chunk_name: &str, source: &str) -> PluginResult<()> {
        self.lua
            .load(source)
            .set_name(format!("@{chunk_name}"))
            .exec()
            .map_err(|e| self.script_err(e))
    }

    fn has_callback(&self) -> bool {
        self.registered(CALLBACK_KEY).is_some()
    }

    fn has_action_handler(&self) -> bool {
        self.registered(ACTION_KEY).is_some()
    }

    fn call_registered_callback(&mut self, input: &str) -> PluginResult<bool> {
        let Some(callback) = self.registered(CALLBACK_KEY) else {
            return Ok(false);
        };
        callback
            .call::<()>(input)
            .map_err(|e| self.script_err(e))?;
        Ok(true)
    }

    fn call_registered_handler(&mut self, action_id: &str) -> PluginResult<Option<bool>> {
        let Some(handler) = self.registered(ACTION_KEY) else {
            return Ok(None);
        };
        let result = handler
            .call::<LuaValue>(action_id)
            .map_err(|e| self.script_err(e))?;
        Ok(Some(matches!(result, LuaValue::Boolean(true))))
    }

    fn get_global(&self, name: &str) -> PluginResult<Value> {
        let value: LuaValue = self
            .lua
            .globals()
            .get(name)
            .map_err(|e| PluginError::engine(self.plugin.clone(), e))?;
        Ok(bindings::lua_to_value(&value))
    }
}

/// Creates [`LuaEngine`]s for `.lua` entry scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaEngineFactory;

impl EngineFactory for LuaEngineFactory {
    fn name(&self) -> &'static str {
        "lua"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &[".lua"]
    }

    fn create(&self, api: HostApi, limits: EngineLimits) -> PluginResult<Box<dyn ScriptEngine>> {
        Ok(Box::new(LuaEngine::new(api, limits)?))
    }
}
