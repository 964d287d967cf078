//! Result items shown by the launcher.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A single row in the launcher's result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Identifier, unique within one result list.
    pub id: String,

    /// Main text.
    pub title: String,

    /// Secondary text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,

    /// Icon identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Action id passed back to the plugin's action handler on selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl ResultItem {
    /// Create an item with just a title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            subtitle: None,
            icon: None,
            action: None,
        }
    }

    /// Build an item from a script value.
    ///
    /// Returns `None` for anything that is not an object with a string
    /// `title`. Optional fields of the wrong type are dropped and a missing
    /// `id` falls back to `index`.
    pub fn from_value(value: &Value, index: usize) -> Option<Self> {
        let obj = value.as_object()?;
        let title = obj.get("title")?.as_str()?.to_string();

        let text = |key: &str| -> Option<String> {
            match obj.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Integer(i) => Some(i.to_string()),
                _ => None,
            }
        };

        Some(Self {
            id: text("id").unwrap_or_else(|| index.to_string()),
            title,
            subtitle: text("subtitle"),
            icon: text("icon"),
            action: text("action"),
        })
    }

    /// Convert a script value into a result list.
    ///
    /// Returns `None` when the value is not an array; malformed entries inside
    /// an array are skipped.
    pub fn list_from_value(value: &Value) -> Option<Vec<Self>> {
        let entries = value.as_array()?;
        Some(
            entries
                .iter()
                .enumerate()
                .filter_map(|(i, v)| Self::from_value(v, i))
                .collect(),
        )
    }
}
