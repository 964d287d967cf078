//! Core types for the kestrel plugin host.
//!
//! This crate holds the plain data model shared by the plugin runtime and the
//! launcher front-end: plugin manifests and their permission declarations,
//! loaded plugins, result items, script values and per-plugin settings.
//! Nothing in here touches a script engine.

mod config;
mod error;
mod item;
mod manifest;
mod plugin;
mod settings;
mod value;

pub use config::{HostConfig, HostConfigBuilder};
pub use error::LoadError;
pub use item::ResultItem;
pub use manifest::{DEFAULT_MAIN, Manifest, PermissionSpec, PermissionType, compare_versions};
pub use plugin::Plugin;
pub use settings::{ConfigEntry, ConfigValue, PluginConfig};
pub use value::Value;
