//! Capability-scoped plugin runtime for kestrel.
//!
//! Plugins are directories holding a `manifest.yaml` and an entry script.
//! Each plugin runs in its own script context (Lua or Rhai) and reaches the
//! host only through a small API whose sensitive calls are gated by the
//! permissions the manifest declares.
//!
//! # Architecture
//!
//! - [`load_plugin`] turns a directory into a [`kestrel_core::Plugin`].
//! - [`PermissionEvaluator`] answers capability questions for a plugin.
//! - [`PluginRegistry`] maps names and command triggers to plugins.
//! - [`PluginExecutor`] owns one [`PluginInstance`] per plugin; each instance
//!   wraps a [`ScriptEngine`] built by an [`EngineFactory`].
//! - [`HostApi`] is the per-instance bridge injected into the script.
//! - [`PluginSystem`] ties all of the above together for the launcher.
//!
//! # Example
//!
//! ```ignore
//! use kestrel_core::HostConfig;
//! use kestrel_plugin::PluginSystem;
//!
//! let mut system = PluginSystem::new(HostConfig::default());
//! system.discover();
//!
//! if let Some((plugin, rest)) = system.match_input("/echo hello") {
//!     system.dispatch_input(plugin.name(), &rest)?;
//!     let items = system.results(plugin.name());
//! }
//! ```

mod api;
mod clipboard;
mod config_store;
mod engine;
mod events;
mod executor;
mod instance;
mod loader;
pub mod lua;
mod network;
mod permission;
mod registry;
pub mod rhai;
mod system;
mod types;

pub use api::{HostApi, HostServices, ScriptLogLevel};
pub use clipboard::{Clipboard, MemoryClipboard};
pub use config_store::ConfigStore;
pub use engine::{EngineFactory, EngineLimits, ScriptEngine, default_factories, select_factory};
pub use events::{EVENT_CHANNEL_CAPACITY, EventSender, PluginEvent};
pub use executor::PluginExecutor;
pub use instance::PluginInstance;
pub use loader::{DEFAULTS_FILE, MANIFEST_FILE, load_plugin, scan_plugin_directories};
pub use network::{
    DEFAULT_MAX_BODY_SIZE, HttpClient, NetworkClient, NetworkRequest, NetworkResponse,
};
pub use permission::{
    PermissionEvaluator, PermissionSummary, RiskLevel, canonicalize_existing, is_within,
    normalize_path,
};
pub use registry::PluginRegistry;
pub use system::{DiscoveryFailure, DiscoveryReport, PluginSystem};
pub use types::{PluginError, PluginResult};
