//! Error types for plugin loading.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading a plugin directory.
///
/// Every variant is recoverable: discovery logs the failure and moves on to
/// the next directory.
#[derive(Debug, Error)]
pub enum LoadError {
    /// `manifest.yaml` is missing, unparsable or fails validation.
    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    /// The entry script named by `main` does not exist.
    #[error("Main script not found: {path}")]
    MissingMainFile { path: PathBuf },

    /// The entry script exists but cannot be used.
    #[error("Invalid script: {reason}")]
    InvalidScript { reason: String },

    /// Any other failure (missing directory, unreadable files).
    #[error("Failed to load plugin: {reason}")]
    LoadFailed { reason: String },
}

impl LoadError {
    /// Create an invalid manifest error.
    pub fn invalid_manifest(reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            reason: reason.into(),
        }
    }

    /// Create an invalid script error.
    pub fn invalid_script(reason: impl Into<String>) -> Self {
        Self::InvalidScript {
            reason: reason.into(),
        }
    }

    /// Create a generic load failure.
    pub fn load_failed(reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            reason: reason.into(),
        }
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidManifest { .. } => "invalid_manifest",
            Self::MissingMainFile { .. } => "missing_main_file",
            Self::InvalidScript { .. } => "invalid_script",
            Self::LoadFailed { .. } => "load_failed",
        }
    }
}
