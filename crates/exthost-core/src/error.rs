//! Core errors.

use thiserror::Error;

use exthost_mcp::McpClientError;
use exthost_protocols::ExtensionError;

/// Record store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The state file was written by an incompatible release.
    #[error("Unsupported store format version: {0}")]
    UnsupportedVersion(u32),
}

impl From<StoreError> for ExtensionError {
    fn from(err: StoreError) -> Self {
        ExtensionError::Storage(err.to_string())
    }
}

/// Tool invocation errors.
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("Extension not active: {0}")]
    NotActive(String),

    #[error("Unknown MCP server {server} in extension {extension}")]
    UnknownServer { extension: String, server: String },

    #[error("MCP server {server} of extension {extension} is not ready")]
    ServerUnavailable { extension: String, server: String },

    #[error("MCP client error: {0}")]
    Client(#[from] McpClientError),
}
