//! Extension lifecycle errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ManifestError;

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Extension already installed: {0}")]
    AlreadyInstalled(String),

    #[error("Reload already in progress for extension: {0}")]
    AlreadyInProgress(String),

    #[error("Invalid manifest for {extension}: {source}")]
    InvalidManifest {
        extension: String,
        #[source]
        source: ManifestError,
    },

    #[error("Activation failed for {extension}: {}", .failures.join("; "))]
    ActivationFailed {
        extension: String,
        failures: Vec<String>,
    },

    #[error("Connection to MCP server {server} timed out after {timeout_ms}ms")]
    ConnectionTimeout { server: String, timeout_ms: u64 },

    #[error("Extension source error: {0}")]
    Source(String),

    #[error("Extension storage error: {0}")]
    Storage(String),
}

impl ExtensionError {
    /// Wrap a manifest error with the extension it belongs to.
    pub fn invalid_manifest(extension: impl Into<String>, source: ManifestError) -> Self {
        Self::InvalidManifest {
            extension: extension.into(),
            source,
        }
    }
}

/// Non-fatal conditions attached to an installed extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtensionWarning {
    /// Some MCP servers of the active generation failed to connect.
    PartialActivation { failed: Vec<String> },
    /// The manifest at the source no longer matches the installed generation.
    SourceDrift { source_version: String },
}

impl std::fmt::Display for ExtensionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtensionWarning::PartialActivation { failed } => {
                write!(f, "partial activation, unavailable servers: {}", failed.join(", "))
            }
            ExtensionWarning::SourceDrift { source_version } => {
                write!(
                    f,
                    "source manifest ({}) differs from installed generation, update to reconcile",
                    source_version
                )
            }
        }
    }
}
