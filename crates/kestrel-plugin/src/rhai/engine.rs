//! Rhai script engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kestrel_core::Value;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{AST, Dynamic, Engine, FnPtr, Scope};

use crate::api::{HostApi, ScriptLogLevel};
use crate::engine::{EngineFactory, EngineLimits, ScriptEngine};
use crate::types::{PluginError, PluginResult};

/// Functions a script registered for later dispatch.
#[derive(Default)]
struct HandlerSlots {
    callback: Option<FnPtr>,
    action: Option<FnPtr>,
}

/// A single Rhai engine, AST and scope bound to one plugin.
pub struct RhaiEngine {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    slots: Arc<Mutex<HandlerSlots>>,
    plugin: String,
}

impl RhaiEngine {
    /// Create an engine with safety limits and the host API registered.
    pub fn new(api: HostApi) -> Self {
        let mut engine = Engine::new();

        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(64);
        engine.set_max_string_size(1024 * 1024);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(10_000);
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");

        let slots = Arc::new(Mutex::new(HandlerSlots::default()));
        register_host_api(&mut engine, &api, &slots);

        Self {
            engine,
            ast: AST::empty(),
            scope: Scope::new(),
            slots,
            plugin: api.plugin_name().to_string(),
        }
    }

    fn slot(&self, pick: fn(&HandlerSlots) -> &Option<FnPtr>) -> Option<FnPtr> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        pick(&slots).clone()
    }

    fn script_err(&self, e: impl std::fmt::Display) -> PluginError {
        PluginError::script(self.plugin.clone(), e)
    }
}

fn register_host_api(engine: &mut Engine, api: &HostApi, slots: &Arc<Mutex<HandlerSlots>>) {
    let name = api.plugin_name().to_string();
    engine.on_print(move |text| {
        tracing::info!(target: "plugin", plugin = %name, "{text}");
    });
    let name = api.plugin_name().to_string();
    engine.on_debug(move |text, _source, pos| {
        tracing::debug!(target: "plugin", plugin = %name, position = %pos, "{text}");
    });

    let s = slots.clone();
    engine.register_fn("registerCallback", move |f: FnPtr| {
        s.lock().unwrap_or_else(|e| e.into_inner()).callback = Some(f);
    });
    let s = slots.clone();
    engine.register_fn("registerCallback", move |_: ()| {
        s.lock().unwrap_or_else(|e| e.into_inner()).callback = None;
    });
    let s = slots.clone();
    engine.register_fn("registerActionHandler", move |f: FnPtr| {
        s.lock().unwrap_or_else(|e| e.into_inner()).action = Some(f);
    });
    let s = slots.clone();
    engine.register_fn("registerActionHandler", move |_: ()| {
        s.lock().unwrap_or_else(|e| e.into_inner()).action = None;
    });

    let a = api.clone();
    engine.register_fn("display", move |items: Dynamic| {
        a.display(&dynamic_to_value(&items));
    });

    let a = api.clone();
    engine.register_fn("log", move |message: Dynamic| {
        a.log(ScriptLogLevel::Info, &message.to_string());
    });
    let a = api.clone();
    engine.register_fn("log", move |message: Dynamic, level: Dynamic| {
        let level = level.into_string().ok();
        a.log(ScriptLogLevel::parse(level.as_deref()), &message.to_string());
    });

    let a = api.clone();
    engine.register_fn("getConfig", move || value_to_dynamic(&a.get_config()));

    let a = api.clone();
    engine.register_fn("getDataPath", move || {
        a.data_path().to_string_lossy().into_owned()
    });

    let a = api.clone();
    engine.register_fn("readFile", move |path: Dynamic| -> Dynamic {
        text_arg(&path)
            .and_then(|p| a.read_file(&p))
            .map_or(Dynamic::UNIT, Dynamic::from)
    });

    let a = api.clone();
    engine.register_fn("writeFile", move |path: Dynamic, content: Dynamic| {
        match (text_arg(&path), text_arg(&content)) {
            (Some(path), Some(content)) => a.write_file(&path, &content),
            _ => false,
        }
    });

    let a = api.clone();
    engine.register_fn("readClipboard", move || -> Dynamic {
        a.read_clipboard().map_or(Dynamic::UNIT, Dynamic::from)
    });

    let a = api.clone();
    engine.register_fn("writeClipboard", move |text: Dynamic| {
        text_arg(&text).is_some_and(|t| a.write_clipboard(&t))
    });

    let a = api.clone();
    engine.register_fn("networkRequest", move |request: Dynamic| -> Dynamic {
        a.network_request(&dynamic_to_value(&request))
            .map_or(Dynamic::UNIT, |response| value_to_dynamic(&response))
    });

    let a = api.clone();
    engine.register_fn("notify", move |title: Dynamic| {
        text_arg(&title).is_some_and(|t| a.notify(&t, None))
    });
    let a = api.clone();
    engine.register_fn("notify", move |title: Dynamic, body: Dynamic| {
        text_arg(&title).is_some_and(|t| a.notify(&t, text_arg(&body).as_deref()))
    });

    let introspection: [(&str, fn(&HostApi) -> bool); 5] = [
        ("hasFileReadPermission", HostApi::has_file_read_permission),
        ("hasFileWritePermission", HostApi::has_file_write_permission),
        ("hasNetworkPermission", HostApi::has_network_permission),
        ("hasClipboardPermission", HostApi::has_clipboard_permission),
        ("hasNotificationPermission", HostApi::has_notification_permission),
    ];
    for (name, check) in introspection {
        let a = api.clone();
        engine.register_fn(name, move || check(&a));
    }
}

impl ScriptEngine for RhaiEngine {
    fn name(&self) -> &'static str {
        "rhai"
    }

    fn load_script(&mut self, chunk_name: &str, source: &str) -> PluginResult<()> {
        let mut ast = self
            .engine
            .compile(source)
            .map_err(|e| self.script_err(format!("{chunk_name}: {e}")))?;
        ast.set_source(chunk_name);
        self.ast = ast;

        self.engine
            .run_ast_with_scope(&mut self.scope, &self.ast)
            .map_err(|e| PluginError::script(self.plugin.clone(), e))
    }

    fn has_callback(&self) -> bool {
        self.slot(|s| &s.callback).is_some()
    }

    fn has_action_handler(&self) -> bool {
        self.slot(|s| &s.action).is_some()
    }

    fn call_registered_callback(&mut self, input: &str) -> PluginResult<bool> {
        let Some(callback) = self.slot(|s| &s.callback) else {
            return Ok(false);
        };
        callback
            .call::<Dynamic>(&self.engine, &self.ast, (input.to_string(),))
            .map_err(|e| self.script_err(e))?;
        Ok(true)
    }

    fn call_registered_handler(&mut self, action_id: &str) -> PluginResult<Option<bool>> {
        let Some(handler) = self.slot(|s| &s.action) else {
            return Ok(None);
        };
        let result = handler
            .call::<Dynamic>(&self.engine, &self.ast, (action_id.to_string(),))
            .map_err(|e| self.script_err(e))?;
        Ok(Some(result.as_bool().unwrap_or(false)))
    }

    fn get_global(&self, name: &str) -> PluginResult<Value> {
        Ok(self
            .scope
            .get_value::<Dynamic>(name)
            .map(|v| dynamic_to_value(&v))
            .unwrap_or(Value::Null))
    }
}

/// Creates [`RhaiEngine`]s for `.rhai` entry scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RhaiEngineFactory;

impl EngineFactory for RhaiEngineFactory {
    fn name(&self) -> &'static str {
        "rhai"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &[".rhai"]
    }

    // Rhai has no allocator hook, so the memory limit is covered by the
    // structural size limits instead.
    fn create(&self, api: HostApi, _limits: EngineLimits) -> PluginResult<Box<dyn ScriptEngine>> {
        Ok(Box::new(RhaiEngine::new(api)))
    }
}

fn text_arg(value: &Dynamic) -> Option<String> {
    if value.is_string() {
        value.clone().into_string().ok()
    } else if value.is_int() || value.is_float() {
        Some(value.to_string())
    } else {
        None
    }
}

/// Convert a Rhai value to a host value.
pub fn dynamic_to_value(val: &Dynamic) -> Value {
    if val.is_unit() {
        Value::Null
    } else if val.is_bool() {
        Value::Bool(val.as_bool().unwrap_or(false))
    } else if val.is_int() {
        Value::Integer(val.as_int().unwrap_or(0))
    } else if val.is_float() {
        Value::Float(val.as_float().unwrap_or(0.0))
    } else if val.is_string() || val.is_char() {
        Value::String(val.to_string())
    } else if val.is_array() {
        let arr = val.clone().into_array().unwrap_or_default();
        Value::Array(arr.iter().map(dynamic_to_value).collect())
    } else if val.is_map() {
        let map = val.clone().try_cast::<rhai::Map>().unwrap_or_default();
        let obj: HashMap<String, Value> = map
            .into_iter()
            .map(|(k, v)| (k.to_string(), dynamic_to_value(&v)))
            .collect();
        Value::Object(obj)
    } else {
        Value::Null
    }
}

/// Convert a host value to a Rhai value.
pub fn value_to_dynamic(val: &Value) -> Dynamic {
    match val {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Integer(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => {
            let rhai_arr: rhai::Array = arr.iter().map(value_to_dynamic).collect();
            Dynamic::from(rhai_arr)
        }
        Value::Object(obj) => {
            let mut map = rhai::Map::new();
            for (k, v) in obj {
                map.insert(k.clone().into(), value_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use kestrel_core::{Manifest, Plugin, ResultItem};
    use tempfile::TempDir;

    use super::*;
    use crate::api::tests::services;

    fn engine(temp: &TempDir) -> (RhaiEngine, Arc<Mutex<Vec<ResultItem>>>) {
        let manifest = Manifest::from_yaml(
            "name: rhaitest\nversion: '1'\ndisplayName: R\ndescription: d\ncommand: /rt\nmain: main.rhai\n",
        )
        .unwrap();
        let plugin = Arc::new(Plugin::new("/plugins/rhaitest", manifest, "x"));
        let results: Arc<Mutex<Vec<ResultItem>>> = Arc::default();
        let api = HostApi::new(plugin, services(temp.path()), results.clone());
        (RhaiEngine::new(api), results)
    }

    #[test]
    fn test_closure_callback_and_display() {
        let temp = TempDir::new().unwrap();
        let (mut engine, results) = engine(&temp);
        engine
            .load_script(
                "echo",
                r#"
registerCallback(|input| {
    display([#{ title: "Received: " + input, action: "copy" }]);
});
"#,
            )
            .unwrap();

        assert!(engine.has_callback());
        assert!(engine.call_registered_callback("hello").unwrap());
        let items = results.lock().unwrap().clone();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Received: hello");
        assert_eq!(items[0].action.as_deref(), Some("copy"));
    }

    #[test]
    fn test_named_function_handler() {
        let temp = TempDir::new().unwrap();
        let (mut engine, _) = engine(&temp);
        engine
            .load_script(
                "actions",
                r#"
fn on_action(id) { id == "ok" }
registerActionHandler(Fn("on_action"));
"#,
            )
            .unwrap();

        assert!(!engine.has_callback());
        assert_eq!(engine.call_registered_handler("ok").unwrap(), Some(true));
        assert_eq!(engine.call_registered_handler("nope").unwrap(), Some(false));
    }

    #[test]
    fn test_eval_disabled_and_scope_globals() {
        let temp = TempDir::new().unwrap();
        let (mut engine, _) = engine(&temp);
        assert!(engine.load_script("bad", r#"eval("1 + 1")"#).is_err());

        engine
            .load_script("ok", "let counter = 41; counter += 1; let denied = readFile(\"/etc/hosts\");")
            .unwrap();
        assert_eq!(engine.get_global("counter").unwrap(), Value::Integer(42));
        assert_eq!(engine.get_global("denied").unwrap(), Value::Null);
        assert_eq!(engine.get_global("missing").unwrap(), Value::Null);
    }

    #[test]
    fn test_imports_are_not_resolved() {
        let temp = TempDir::new().unwrap();
        let (mut engine, _) = engine(&temp);
        assert!(engine.load_script("imp", r#"import "secrets" as s;"#).is_err());
    }

    #[test]
    fn test_callback_error_is_script_error() {
        let temp = TempDir::new().unwrap();
        let (mut engine, _) = engine(&temp);
        engine
            .load_script("boom", r#"registerCallback(|input| { throw "bad input"; });"#)
            .unwrap();
        assert!(matches!(
            engine.call_registered_callback("x"),
            Err(PluginError::Script { .. })
        ));
    }

    #[test]
    fn test_value_conversion() {
        let mut obj = HashMap::new();
        obj.insert("list".to_string(), Value::from(vec![1i64, 2]));
        obj.insert("flag".to_string(), Value::Bool(true));
        let value = Value::Object(obj);
        assert_eq!(dynamic_to_value(&value_to_dynamic(&value)), value);
    }
}
