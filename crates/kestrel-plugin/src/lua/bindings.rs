//! Host API bindings for Lua.

use std::collections::HashMap;

use kestrel_core::Value;
use mlua::{Function, Lua, Table, Value as LuaValue, Variadic};

use crate::api::{HostApi, ScriptLogLevel};

/// Registry slot holding the input callback.
pub(super) const CALLBACK_KEY: &str = "kestrel.callback";

/// Registry slot holding the action handler.
pub(super) const ACTION_KEY: &str = "kestrel.action";

/// Nesting depth past which tables convert to null.
const MAX_DEPTH: usize = 32;

/// Install every host function as a global.
pub(super) fn install_host_api(lua: &Lua, api: &HostApi) -> mlua::Result<()> {
    let globals = lua.globals();

    globals.set(
        "registerCallback",
        lua.create_function(|lua, callback: Option<Function>| {
            lua.set_named_registry_value(CALLBACK_KEY, callback)
        })?,
    )?;

    globals.set(
        "registerActionHandler",
        lua.create_function(|lua, handler: Option<Function>| {
            lua.set_named_registry_value(ACTION_KEY, handler)
        })?,
    )?;

    let a = api.clone();
    globals.set(
        "display",
        lua.create_function(move |_, items: LuaValue| {
            a.display(&lua_to_value(&items));
            Ok(())
        })?,
    )?;

    let a = api.clone();
    globals.set(
        "log",
        lua.create_function(move |_, (message, level): (LuaValue, Option<String>)| {
            a.log(ScriptLogLevel::parse(level.as_deref()), &display_string(&message));
            Ok(())
        })?,
    )?;

    let a = api.clone();
    globals.set(
        "print",
        lua.create_function(move |_, args: Variadic<LuaValue>| {
            let line: Vec<String> = args.iter().map(display_string).collect();
            a.log(ScriptLogLevel::Info, &line.join("\t"));
            Ok(())
        })?,
    )?;

    let a = api.clone();
    globals.set(
        "getConfig",
        lua.create_function(move |lua, ()| value_to_lua(lua, &a.get_config()))?,
    )?;

    let a = api.clone();
    globals.set(
        "getDataPath",
        lua.create_function(move |_, ()| Ok(a.data_path().to_string_lossy().into_owned()))?,
    )?;

    let a = api.clone();
    globals.set(
        "readFile",
        lua.create_function(move |_, path: LuaValue| {
            Ok(text_arg(&path).and_then(|p| a.read_file(&p)))
        })?,
    )?;

    let a = api.clone();
    globals.set(
        "writeFile",
        lua.create_function(move |_, (path, content): (LuaValue, LuaValue)| {
            Ok(match (text_arg(&path), text_arg(&content)) {
                (Some(path), Some(content)) => a.write_file(&path, &content),
                _ => false,
            })
        })?,
    )?;

    let a = api.clone();
    globals.set(
        "readClipboard",
        lua.create_function(move |_, ()| Ok(a.read_clipboard()))?,
    )?;

    let a = api.clone();
    globals.set(
        "writeClipboard",
        lua.create_function(move |_, text: LuaValue| {
            Ok(text_arg(&text).is_some_and(|t| a.write_clipboard(&t)))
        })?,
    )?;

    let a = api.clone();
    globals.set(
        "networkRequest",
        lua.create_function(move |lua, request: LuaValue| {
            match a.network_request(&lua_to_value(&request)) {
                Some(response) => value_to_lua(lua, &response),
                None => Ok(LuaValue::Nil),
            }
        })?,
    )?;

    let a = api.clone();
    globals.set(
        "notify",
        lua.create_function(move |_, (title, body): (LuaValue, LuaValue)| {
            Ok(match text_arg(&title) {
                Some(title) => a.notify(&title, text_arg(&body).as_deref()),
                None => false,
            })
        })?,
    )?;

    let introspection: [(&str, fn(&HostApi) -> bool); 5] = [
        ("hasFileReadPermission", HostApi::has_file_read_permission),
        ("hasFileWritePermission", HostApi::has_file_write_permission),
        ("hasNetworkPermission", HostApi::has_network_permission),
        ("hasClipboardPermission", HostApi::has_clipboard_permission),
        ("hasNotificationPermission", HostApi::has_notification_permission),
    ];
    for (name, check) in introspection {
        let a = api.clone();
        globals.set(name, lua.create_function(move |_, ()| Ok(check(&a)))?)?;
    }

    Ok(())
}

/// String or number argument as text; anything else is `None`.
fn text_arg(value: &LuaValue) -> Option<String> {
    match value {
        LuaValue::String(s) => Some(s.to_string_lossy()),
        LuaValue::Integer(i) => Some(i.to_string()),
        LuaValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Render a value the way `tostring` would for log output.
fn display_string(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Table(_) => serde_json::to_string(&lua_to_value(value)).unwrap_or_default(),
        other => text_arg(other).unwrap_or_else(|| other.type_name().to_string()),
    }
}

/// Convert a Lua value to a host value.
///
/// Tables whose keys are exactly `1..=n` become arrays (an empty table is an
/// empty array); other tables become objects keyed by their string or number
/// keys. Functions, userdata and threads become null.
pub fn lua_to_value(value: &LuaValue) -> Value {
    convert(value, &mut Vec::new())
}

fn convert(value: &LuaValue, path: &mut Vec<*const std::ffi::c_void>) -> Value {
    match value {
        LuaValue::Nil => Value::Null,
        LuaValue::Boolean(b) => Value::Bool(*b),
        LuaValue::Integer(i) => Value::Integer(*i),
        LuaValue::Number(n) => Value::Float(*n),
        LuaValue::String(s) => Value::String(s.to_string_lossy()),
        LuaValue::Table(t) => {
            let ptr = t.to_pointer();
            // Cycles and runaway nesting become null.
            if path.len() >= MAX_DEPTH || path.contains(&ptr) {
                return Value::Null;
            }
            path.push(ptr);
            let converted = table_to_value(t, path);
            path.pop();
            converted
        }
        _ => Value::Null,
    }
}

fn table_to_value(table: &Table, path: &mut Vec<*const std::ffi::c_void>) -> Value {
    let pairs: Vec<(LuaValue, LuaValue)> = table
        .pairs::<LuaValue, LuaValue>()
        .filter_map(Result::ok)
        .collect();

    let len = pairs.len() as i64;
    let is_array = pairs
        .iter()
        .all(|(k, _)| matches!(k, LuaValue::Integer(i) if *i >= 1 && *i <= len));

    if is_array {
        let mut items = vec![Value::Null; pairs.len()];
        for (k, v) in &pairs {
            if let LuaValue::Integer(i) = k {
                items[(*i - 1) as usize] = convert(v, path);
            }
        }
        return Value::Array(items);
    }

    let mut obj = HashMap::new();
    for (k, v) in &pairs {
        if let Some(key) = text_arg(k) {
            obj.insert(key, convert(v, path));
        }
    }
    Value::Object(obj)
}

/// Convert a host value to a Lua value.
pub fn value_to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    match value {
        Value::Null => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Integer(i) => Ok(LuaValue::Integer(*i)),
        Value::Float(f) => Ok(LuaValue::Number(*f)),
        Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.set(i + 1, value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Object(obj) => {
            let table = lua.create_table()?;
            for (k, v) in obj {
                table.set(k.as_str(), value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}
