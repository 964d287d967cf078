//! Error types for the plugin runtime.

use kestrel_core::LoadError;
use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur in the plugin system after a plugin directory has
/// been located.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin directory could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// No plugin is registered under this name.
    #[error("Plugin not found: {name}")]
    NotFound { name: String },

    /// No engine handles the entry script's file type.
    #[error("No script engine available for '{entry}'")]
    EngineUnavailable { entry: String },

    /// The engine failed outside of script code (context setup, marshalling).
    #[error("Plugin '{name}' engine error: {message}")]
    Engine { name: String, message: String },

    /// A script raised an error.
    #[error("Plugin '{name}' script error: {message}")]
    Script { name: String, message: String },

    /// Permission declarations are malformed.
    #[error("Plugin '{name}' has invalid permissions: {}", .issues.join("; "))]
    InvalidPermissions { name: String, issues: Vec<String> },

    /// The host version is outside the manifest's compatibility bounds.
    #[error("Plugin '{name}' requires app version {required}")]
    Incompatible { name: String, required: String },

    /// Plugin settings could not be read or written.
    #[error("Plugin config error: {message}")]
    Config { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PluginError {
    /// Create a script error.
    pub fn script(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Script {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create an engine error.
    pub fn engine(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Engine {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
