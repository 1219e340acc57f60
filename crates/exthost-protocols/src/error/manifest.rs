//! Manifest parsing and validation errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid extension name: {0:?}")]
    InvalidName(String),

    #[error("Invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Duplicate MCP server name: {0}")]
    DuplicateServer(String),

    #[error("Invalid MCP server {server}: {reason}")]
    InvalidServer { server: String, reason: String },

    #[error("Invalid hook for event {event}: {reason}")]
    InvalidHook { event: String, reason: String },

    #[error("Manifest name {found} does not match installed extension {expected}")]
    NameMismatch { expected: String, found: String },
}
