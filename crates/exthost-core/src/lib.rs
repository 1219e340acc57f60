//! # exthost Core
//!
//! Lifecycle engine for extensions that contribute MCP servers and hooks.
//!
//! ## Components
//!
//! - [`RecordStore`] - Durable records of installed extensions
//! - [`UpdateDetector`] - Compares installed generations with their sources
//! - [`ConnectionManager`] - Live MCP connections per extension generation
//! - [`HookBindingTable`] - Event to hook bindings across extensions
//! - [`ReloadCoordinator`] - Transactional install, update and uninstall
//! - [`StatusPublisher`] - Consistent snapshots and user notices
//! - [`ExtensionHost`] - Everything above, wired from a config

pub mod connection;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod hooks;
pub mod host;
pub mod source;
pub mod status;
pub mod store;
pub mod tracker;

pub use connection::{
    ActivationReport, ConnectionManager, ConnectionSet, ConnectionState, Connector,
    DefaultConnector, McpConnection, ServerStatus,
};
pub use coordinator::{ReloadCoordinator, ReloadOutcome};
pub use detector::{UpdateCheck, UpdateDetector, UpdatePoller};
pub use error::{StoreError, ToolCallError};
pub use hooks::{HookBinding, HookBindingTable, HookDecision, HookOutcome, HookRunner};
pub use host::ExtensionHost;
pub use source::{DefaultManifestSource, ManifestSource, load_local_manifest, resolve_source};
pub use status::{Notice, StatusPublisher, StatusSnapshot};
pub use store::RecordStore;
pub use tracker::{TransactionGuard, TransactionTracker};
