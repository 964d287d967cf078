//! Capability evaluation for plugins.
//!
//! Every check is evaluated against the plugin's declared
//! [`PermissionSpec`] list at call time. Nothing is cached, so a plugin can
//! hold several independently scoped grants (read-only in one tree,
//! read-write in another) without one widening the other.

use std::fs;
use std::path::{Component, Path, PathBuf};

use kestrel_core::{PermissionSpec, PermissionType, Plugin};
use serde::Serialize;
use strum::Display;

use crate::types::{PluginError, PluginResult};

/// Coarse risk classification of a plugin's permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    /// No capabilities at all.
    None,
    /// Clipboard, notifications or directory-scoped reads.
    Low,
    /// Network, unrestricted reads or directory-scoped writes.
    Medium,
    /// Unrestricted writes, or network together with unrestricted file access.
    High,
}

/// Capability list and risk of a plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionSummary {
    /// Plugin name.
    pub plugin: String,
    /// Declared permissions, verbatim.
    pub permissions: Vec<PermissionSpec>,
    /// Distinct capabilities in declaration order.
    pub capabilities: Vec<PermissionType>,
    /// Overall risk.
    pub risk: RiskLevel,
}

/// Stateless permission evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    /// Create an evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Whether the plugin declares `kind` at all.
    ///
    /// A plugin without a `permissions` field has no capabilities.
    pub fn has_permission(&self, plugin: &Plugin, kind: PermissionType) -> bool {
        plugin.permissions().iter().any(|spec| spec.kind == kind)
    }

    /// Whether the plugin may perform a file operation of `kind` on `path`.
    ///
    /// `kind` must be `fileRead` or `fileWrite`. Each type is checked against
    /// its own grants only; a read grant never widens writes. A grant with no
    /// directories is unrestricted. Otherwise `path` must be one of the
    /// declared directories or lie beneath one, compared component-wise after
    /// lexical normalisation (so `/a/b` does not cover `/a/bc`). The same
    /// containment must also hold once symlinks in the existing part of both
    /// paths are resolved, see [`canonicalize_existing`].
    pub fn has_file_permission(&self, plugin: &Plugin, kind: PermissionType, path: &Path) -> bool {
        if !kind.is_file() {
            return false;
        }

        let target = normalize_path(path);
        let mut resolved = None;
        plugin
            .permissions()
            .iter()
            .filter(|spec| spec.kind == kind)
            .any(|spec| match spec.directories.as_deref() {
                None | Some([]) => true,
                Some(dirs) => dirs
                    .iter()
                    .filter(|d| !d.trim().is_empty())
                    .map(Path::new)
                    .filter(|dir| is_within(&target, dir))
                    .any(|dir| {
                        let real_target = resolved.get_or_insert_with(|| canonicalize_existing(&target));
                        match (real_target.as_deref(), canonicalize_existing(dir)) {
                            (Some(real_target), Some(real_dir)) => is_within(real_target, &real_dir),
                            _ => false,
                        }
                    }),
            })
    }

    /// Whether the plugin holds an unrestricted grant of `kind`.
    pub fn is_unrestricted(&self, plugin: &Plugin, kind: PermissionType) -> bool {
        plugin
            .permissions()
            .iter()
            .any(|spec| spec.kind == kind && spec.is_unrestricted())
    }

    /// Structural validation of the declared permissions.
    ///
    /// Declaring no permissions is valid.
    pub fn validate_permissions(&self, plugin: &Plugin) -> PluginResult<()> {
        let mut issues = Vec::new();

        for spec in plugin.permissions() {
            let Some(dirs) = spec.directories.as_deref() else {
                continue;
            };
            if !spec.kind.is_file() {
                if !dirs.is_empty() {
                    issues.push(format!(
                        "{}: directories only apply to file permissions",
                        spec.kind
                    ));
                }
                continue;
            }
            for dir in dirs {
                if dir.trim().is_empty() {
                    issues.push(format!("{}: empty directory entry", spec.kind));
                } else if !Path::new(dir).is_absolute() {
                    issues.push(format!("{}: directory '{dir}' is not absolute", spec.kind));
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(PluginError::InvalidPermissions {
                name: plugin.name().to_string(),
                issues,
            })
        }
    }

    /// Full capability list plus a risk classification.
    pub fn permission_summary(&self, plugin: &Plugin) -> PermissionSummary {
        let mut capabilities = Vec::new();
        for spec in plugin.permissions() {
            if !capabilities.contains(&spec.kind) {
                capabilities.push(spec.kind);
            }
        }

        let unrestricted_file = self.is_unrestricted(plugin, PermissionType::FileRead)
            || self.is_unrestricted(plugin, PermissionType::FileWrite);

        let risk = capabilities
            .iter()
            .map(|kind| match kind {
                PermissionType::Clipboard | PermissionType::Notification => RiskLevel::Low,
                PermissionType::FileRead if self.is_unrestricted(plugin, *kind) => {
                    RiskLevel::Medium
                }
                PermissionType::FileRead => RiskLevel::Low,
                PermissionType::FileWrite if self.is_unrestricted(plugin, *kind) => {
                    RiskLevel::High
                }
                PermissionType::FileWrite => RiskLevel::Medium,
                PermissionType::Network if unrestricted_file => RiskLevel::High,
                PermissionType::Network => RiskLevel::Medium,
            })
            .max()
            .unwrap_or(RiskLevel::None);

        PermissionSummary {
            plugin: plugin.name().to_string(),
            permissions: plugin.permissions().to_vec(),
            capabilities,
            risk,
        }
    }
}

/// Lexically normalise a path: drop `.` and resolve `..` against earlier
/// components. Does not touch the filesystem or follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Whether `path` equals `dir` or lies beneath it, after normalisation.
pub fn is_within(path: &Path, dir: &Path) -> bool {
    normalize_path(path).starts_with(normalize_path(dir))
}

/// Resolve symlinks in the longest existing prefix of `path` and append the
/// components that do not exist yet.
///
/// Returns `None` when a component exists but cannot be resolved, such as a
/// dangling symlink, since writing through it would land somewhere unknown.
/// A path with no existing prefix comes back normalised but unresolved.
pub fn canonicalize_existing(path: &Path) -> Option<PathBuf> {
    let normalized = normalize_path(path);
    let mut existing = normalized.as_path();
    let mut missing = Vec::new();

    loop {
        match fs::canonicalize(existing) {
            Ok(mut real) => {
                real.extend(missing.iter().rev());
                return Some(real);
            }
            Err(_) if fs::symlink_metadata(existing).is_ok() => return None,
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name);
                    existing = parent;
                }
                _ => return Some(normalized.clone()),
            },
        }
    }
}
