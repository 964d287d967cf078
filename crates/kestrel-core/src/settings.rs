//! Per-plugin user settings.
//!
//! Settings are stored as a YAML map of `key -> {type, value, description?}`:
//!
//! ```yaml
//! max_results:
//!   type: int
//!   value: 20
//!   description: Number of rows to show
//! show_preview:
//!   type: bool
//!   value: true
//! ```

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A typed setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
}

impl ConfigValue {
    /// Name of the type as written in the settings file.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "int",
            Self::Float(_) => "float",
        }
    }

    /// Convert to a script value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Integer(i) => Value::Integer(*i),
            Self::Float(f) => Value::Float(*f),
        }
    }

    /// Convert from a script value. Only scalars are accepted.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Integer(i) => Some(Self::Integer(*i)),
            Value::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    /// Parse a raw string as the named type (`string`, `bool`, `int`, `float`).
    pub fn parse(kind: &str, raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        match kind.to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(Self::String(raw.to_string())),
            "bool" | "boolean" => raw
                .parse::<bool>()
                .map(Self::Bool)
                .map_err(|_| format!("'{raw}' is not a bool")),
            "int" | "integer" => raw
                .parse::<i64>()
                .map(Self::Integer)
                .map_err(|_| format!("'{raw}' is not an integer")),
            "float" | "number" => raw
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|_| format!("'{raw}' is not a number")),
            other => Err(format!("unknown config type '{other}'")),
        }
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

/// One stored setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEntry", into = "RawEntry")]
pub struct ConfigEntry {
    pub value: ConfigValue,
    pub description: Option<String>,
}

impl ConfigEntry {
    pub fn new(value: ConfigValue) -> Self {
        Self {
            value,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ConfigType {
    String,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "number")]
    Float,
}

#[derive(Serialize, Deserialize)]
struct RawEntry {
    #[serde(rename = "type")]
    kind: ConfigType,
    value: serde_yaml::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl TryFrom<RawEntry> for ConfigEntry {
    type Error = String;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        use serde_yaml::Value as Yaml;

        let value = match (raw.kind, &raw.value) {
            (ConfigType::String, Yaml::String(s)) => ConfigValue::String(s.clone()),
            (ConfigType::String, Yaml::Number(n)) => ConfigValue::String(n.to_string()),
            (ConfigType::String, Yaml::Bool(b)) => ConfigValue::String(b.to_string()),
            (ConfigType::Bool, Yaml::Bool(b)) => ConfigValue::Bool(*b),
            (ConfigType::Int, Yaml::Number(n)) => n
                .as_i64()
                .map(ConfigValue::Integer)
                .ok_or_else(|| format!("{n} is not an integer"))?,
            (ConfigType::Float, Yaml::Number(n)) => n
                .as_f64()
                .map(ConfigValue::Float)
                .ok_or_else(|| format!("{n} is not a number"))?,
            (ConfigType::Bool, Yaml::String(s)) => ConfigValue::parse("bool", s)?,
            (ConfigType::Int, Yaml::String(s)) => ConfigValue::parse("int", s)?,
            (ConfigType::Float, Yaml::String(s)) => ConfigValue::parse("float", s)?,
            (kind, other) => return Err(format!("value {other:?} does not match type {kind:?}")),
        };

        Ok(Self {
            value,
            description: raw.description,
        })
    }
}

impl From<ConfigEntry> for RawEntry {
    fn from(entry: ConfigEntry) -> Self {
        use serde_yaml::{Number, Value as Yaml};

        let (kind, value) = match entry.value {
            ConfigValue::String(s) => (ConfigType::String, Yaml::String(s)),
            ConfigValue::Bool(b) => (ConfigType::Bool, Yaml::Bool(b)),
            ConfigValue::Integer(i) => (ConfigType::Int, Yaml::Number(Number::from(i))),
            ConfigValue::Float(f) => (ConfigType::Float, Yaml::Number(Number::from(f))),
        };

        Self {
            kind,
            value,
            description: entry.description,
        }
    }
}

/// All settings for one plugin, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginConfig {
    entries: IndexMap<String, ConfigEntry>,
}

impl PluginConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings YAML. Blank or `null` documents are an empty config.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed == "null" || trimmed == "~" {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn entry(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries.get(key)
    }

    /// Set a value, keeping any existing description.
    pub fn set(&mut self, key: impl Into<String>, value: ConfigValue) {
        let key = key.into();
        match self.entries.get_mut(&key) {
            Some(entry) => entry.value = value,
            None => {
                self.entries.insert(key, ConfigEntry::new(value));
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigEntry> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigEntry)> {
        self.entries.iter()
    }

    /// Overlay `overrides` on top of `self`. Overridden keys keep the
    /// description from `self` unless the override has its own.
    pub fn merged(&self, overrides: &PluginConfig) -> PluginConfig {
        let mut out = self.clone();
        for (key, entry) in &overrides.entries {
            let description = entry
                .description
                .clone()
                .or_else(|| out.entry(key).and_then(|e| e.description.clone()));
            out.entries.insert(
                key.clone(),
                ConfigEntry {
                    value: entry.value.clone(),
                    description,
                },
            );
        }
        out
    }

    /// Flatten into a script object of raw values.
    pub fn to_value(&self) -> Value {
        let map: HashMap<String, Value> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.to_value()))
            .collect();
        Value::Object(map)
    }
}
