//! Plugin manifest (`manifest.yaml`) model.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::LoadError;

/// Entry script used when a manifest does not name one.
pub const DEFAULT_MAIN: &str = "main.lua";

/// Capabilities a plugin may request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum PermissionType {
    /// Outbound HTTP requests.
    Network,

    /// Reading files outside the plugin's data directory.
    FileRead,

    /// Writing files outside the plugin's data directory.
    FileWrite,

    /// Reading and writing the system clipboard.
    Clipboard,

    /// Posting user-visible notifications.
    Notification,
}

impl PermissionType {
    /// Whether this capability is a filesystem capability that can be
    /// scoped to directories.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::FileRead | Self::FileWrite)
    }
}

/// A single permission declaration from the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSpec {
    /// Requested capability.
    #[serde(rename = "type")]
    pub kind: PermissionType,

    /// Absolute directory prefixes the grant is limited to.
    ///
    /// `None` or an empty list leaves the grant unrestricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<String>>,
}

impl PermissionSpec {
    /// Create an unrestricted grant.
    pub fn new(kind: PermissionType) -> Self {
        Self {
            kind,
            directories: None,
        }
    }

    /// Create a grant scoped to the given directories.
    pub fn scoped<I, S>(kind: PermissionType, directories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            directories: Some(directories.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether the grant has no directory restriction.
    pub fn is_unrestricted(&self) -> bool {
        self.directories.as_ref().is_none_or(|dirs| dirs.is_empty())
    }
}

/// Declarative plugin descriptor parsed from `manifest.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Unique plugin name.
    pub name: String,

    /// Plugin version. Bare YAML numbers (`version: 1.0`) are accepted.
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,

    /// Human-readable name shown in the launcher.
    pub display_name: String,

    /// Short description.
    pub description: String,

    /// Command trigger that routes input to this plugin (e.g. `/calc`).
    pub command: String,

    /// Plugin author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Entry script, relative to the plugin directory.
    #[serde(default = "default_main")]
    pub main: String,

    /// Placeholder text for the search field while the plugin is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,

    /// Icon identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_name: Option<String>,

    /// Whether the launcher window hides after an action runs.
    #[serde(default = "default_true")]
    pub should_hide_window_after_action: bool,

    /// Help lines shown for the command.
    #[serde(default)]
    pub help: Vec<String>,

    /// Declared capabilities. `None` grants nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<PermissionSpec>>,

    /// Lowest host version this plugin runs on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_app_version: Option<String>,

    /// Highest host version this plugin runs on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_app_version: Option<String>,

    /// Names of other plugins this one expects.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Search keywords.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Project homepage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    /// Source repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

fn default_main() -> String {
    DEFAULT_MAIN.to_string()
}

fn default_true() -> bool {
    true
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a version string, found {other:?}"
        ))),
    }
}

impl Manifest {
    /// Parse and validate a manifest from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, LoadError> {
        let manifest: Manifest = serde_yaml::from_str(content)
            .map_err(|e| LoadError::invalid_manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check required fields and naming rules.
    pub fn validate(&self) -> Result<(), LoadError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(LoadError::invalid_manifest("name cannot be empty"));
        }
        // The name keys the data directory and the config file.
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(LoadError::invalid_manifest(format!(
                "name '{}' must not contain path separators",
                self.name
            )));
        }
        if self.command.trim().is_empty() {
            return Err(LoadError::invalid_manifest("command cannot be empty"));
        }
        if self.main.trim().is_empty() {
            return Err(LoadError::invalid_manifest("main cannot be empty"));
        }
        Ok(())
    }

    /// Declared permissions, empty when the field is absent.
    pub fn permission_specs(&self) -> &[PermissionSpec] {
        self.permissions.as_deref().unwrap_or_default()
    }

    /// Check the compatibility bounds against a host version.
    pub fn is_compatible_with(&self, app_version: &str) -> bool {
        let above_min = self
            .min_app_version
            .as_deref()
            .is_none_or(|min| compare_versions(app_version, min) != Ordering::Less);
        let below_max = self
            .max_app_version
            .as_deref()
            .is_none_or(|max| compare_versions(app_version, max) != Ordering::Greater);
        above_min && below_max
    }
}

/// Compare two dotted version strings numerically.
///
/// Pre-release suffixes (`-beta.1`) are ignored and missing components count
/// as zero, so `1.2` equals `1.2.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn parts(v: &str) -> Vec<u64> {
        let core = v.trim().trim_start_matches('v');
        let core = core.split(['-', '+']).next().unwrap_or_default();
        core.split('.')
            .map(|p| p.parse::<u64>().unwrap_or(0))
            .collect()
    }

    let (a, b) = (parts(a), parts(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (
            a.get(i).copied().unwrap_or(0),
            b.get(i).copied().unwrap_or(0),
        );
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
name: clipboard-history
version: 1.2.0
displayName: Clipboard History
description: Search past clipboard entries
command: /clip
author: Jane
placeholder: Search clipboard...
iconName: doc.on.clipboard
shouldHideWindowAfterAction: false
help:
  - "/clip <text> - filter entries"
permissions:
  - type: clipboard
  - type: fileRead
    directories: ["/Users/test/Documents"]
minAppVersion: "0.2"
keywords: [clipboard, history]
"#;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = Manifest::from_yaml(FULL).unwrap();
        assert_eq!(manifest.name, "clipboard-history");
        assert_eq!(manifest.display_name, "Clipboard History");
        assert_eq!(manifest.command, "/clip");
        assert_eq!(manifest.main, DEFAULT_MAIN);
        assert!(!manifest.should_hide_window_after_action);
        assert_eq!(manifest.help.len(), 1);
        assert_eq!(manifest.keywords, vec!["clipboard", "history"]);

        let perms = manifest.permission_specs();
        assert_eq!(perms.len(), 2);
        assert_eq!(perms[0].kind, PermissionType::Clipboard);
        assert!(perms[0].is_unrestricted());
        assert_eq!(perms[1].kind, PermissionType::FileRead);
        assert!(!perms[1].is_unrestricted());
    }

    #[test]
    fn test_missing_required_field() {
        let yaml = "name: x\nversion: '1'\ndisplayName: X\ndescription: d\n";
        let err = Manifest::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, LoadError::InvalidManifest { .. }));
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn test_numeric_version_accepted() {
        let yaml = "name: x\nversion: 2\ndisplayName: X\ndescription: d\ncommand: /x\n";
        let manifest = Manifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.version, "2");
        assert!(manifest.permissions.is_none());
    }

    #[test]
    fn test_empty_name_rejected() {
        let yaml = "name: ''\nversion: '1'\ndisplayName: X\ndescription: d\ncommand: /x\n";
        let err = Manifest::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("name cannot be empty"));
    }

    #[test]
    fn test_name_with_separator_rejected() {
        let yaml = "name: ../escape\nversion: '1'\ndisplayName: X\ndescription: d\ncommand: /x\n";
        assert!(Manifest::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_permission_type_rejected() {
        let yaml = "name: x\nversion: '1'\ndisplayName: X\ndescription: d\ncommand: /x\npermissions:\n  - type: shell\n";
        assert!(matches!(
            Manifest::from_yaml(yaml),
            Err(LoadError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_permission_type_strings() {
        assert_eq!(PermissionType::FileWrite.to_string(), "fileWrite");
        assert_eq!(
            "fileRead".parse::<PermissionType>().unwrap(),
            PermissionType::FileRead
        );
        assert!(PermissionType::FileRead.is_file());
        assert!(!PermissionType::Network.is_file());
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("v0.3.1-beta.2", "0.3.1"), Ordering::Equal);
        assert_eq!(compare_versions("0.2", "0.3"), Ordering::Less);
    }

    #[test]
    fn test_compatibility_bounds() {
        let mut manifest = Manifest::from_yaml(FULL).unwrap();
        assert!(manifest.is_compatible_with("0.3.1"));
        assert!(!manifest.is_compatible_with("0.1.9"));

        manifest.max_app_version = Some("0.3".into());
        assert!(manifest.is_compatible_with("0.3.0"));
        assert!(!manifest.is_compatible_with("0.4.0"));
    }
}
