//! # exthost Protocols
//!
//! Shared definitions for the exthost extension manager.
//! Contains only data types and error taxonomy - no I/O.
//!
//! ## Core Types
//!
//! - [`ExtensionManifest`] - Validated declaration of MCP servers and hooks
//! - [`ExtensionRecord`] - Installed extension with its active generation
//! - [`ExtensionSource`] - Where an extension was installed from
//! - [`ExtensionError`] - Errors surfaced by lifecycle operations

pub mod error;
pub mod manifest;
pub mod record;

pub use error::{ExtensionError, ExtensionWarning, ManifestError};
pub use manifest::{
    ExtensionManifest, HookSpec, HooksDocument, ManifestDocument, McpServerSpec,
    McpTransportSpec, HOOKS_FILE_NAME, HOOKS_DIR_NAME, MANIFEST_FILE_NAME,
};
pub use record::{ExtensionRecord, ExtensionSource, ExtensionStatus, ReloadPhase};
