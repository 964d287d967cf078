//! Lua plugin engine.
//!
//! Lua 5.4 through mlua. Each instance gets its own `Lua` state with the
//! filesystem, process and module-loading libraries removed and the host API
//! installed as globals.

mod bindings;
mod engine;

pub use bindings::{lua_to_value, value_to_lua};
pub use engine::{LuaEngine, LuaEngineFactory};
