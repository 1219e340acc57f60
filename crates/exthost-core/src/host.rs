//! Extension host.
//!
//! Wires the record store, connection manager, hook table, coordinator and
//! status publisher together from a [`Config`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use exthost_config::Config;
use exthost_mcp::McpToolResult;
use exthost_protocols::{ExtensionError, ExtensionManifest, ExtensionRecord};

use crate::connection::{ActivationReport, ConnectionManager, ConnectionSet, Connector, DefaultConnector};
use crate::coordinator::{ReloadCoordinator, ReloadOutcome};
use crate::detector::{UpdateCheck, UpdateDetector, UpdatePoller};
use crate::error::ToolCallError;
use crate::hooks::{HookBindingTable, HookOutcome, HookRunner};
use crate::source::{DefaultManifestSource, ManifestSource, resolve_source};
use crate::status::{StatusPublisher, StatusSnapshot};
use crate::store::RecordStore;
use crate::tracker::TransactionTracker;

/// Owns every lifecycle component of one process.
pub struct ExtensionHost {
    config: Config,
    store: Arc<RecordStore>,
    connections: Arc<ConnectionManager>,
    hooks: Arc<HookBindingTable>,
    status: Arc<StatusPublisher>,
    detector: Arc<UpdateDetector>,
    coordinator: ReloadCoordinator,
    runner: HookRunner,
    poller: Option<CancellationToken>,
}

impl ExtensionHost {
    /// Open the persistent store under the configured state directory.
    pub async fn open(config: &Config) -> Result<Self, ExtensionError> {
        let store = RecordStore::open(config.state_dir()).await?;
        let source = DefaultManifestSource::new()?;
        Ok(Self::with_parts(
            config,
            store,
            Arc::new(DefaultConnector),
            Arc::new(source),
        ))
    }

    /// Assemble a host from explicit parts.
    pub fn with_parts(
        config: &Config,
        store: RecordStore,
        connector: Arc<dyn Connector>,
        source: Arc<dyn ManifestSource>,
    ) -> Self {
        let store = Arc::new(store);
        let connections = Arc::new(ConnectionManager::new(
            connector,
            config.mcp.connect_timeout(),
        ));
        let hooks = Arc::new(HookBindingTable::new());
        let tracker = Arc::new(TransactionTracker::new());
        let status = Arc::new(StatusPublisher::new(
            store.clone(),
            connections.clone(),
            hooks.clone(),
            tracker.clone(),
        ));
        let detector = Arc::new(UpdateDetector::new(source.clone()));
        let coordinator = ReloadCoordinator::new(
            store.clone(),
            connections.clone(),
            hooks.clone(),
            source,
            tracker,
            status.clone(),
        )
        .with_policy(config.mcp.partial_activation)
        .with_hot_reload(config.extensions.hot_reload)
        .with_drain_timeout(config.mcp.drain_timeout());
        let runner = HookRunner::new(hooks.clone(), &config.hooks);

        Self {
            config: config.clone(),
            store,
            connections,
            hooks,
            status,
            detector,
            coordinator,
            runner,
            poller: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> &Arc<StatusPublisher> {
        &self.status
    }

    pub fn hooks(&self) -> &Arc<HookBindingTable> {
        &self.hooks
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Activate every persisted extension.
    pub async fn restore(&self) -> Vec<ActivationReport> {
        self.coordinator.restore().await
    }

    /// Install from a local path (relative to the current directory) or URL.
    pub async fn install(&self, source: &str) -> Result<ReloadOutcome, ExtensionError> {
        let source = resolve_source(source).await?;
        self.coordinator.install(source).await
    }

    pub async fn uninstall(&self, name: &str) -> Result<ExtensionRecord, ExtensionError> {
        self.coordinator.uninstall(name).await
    }

    pub async fn update(&self, name: &str) -> Result<ReloadOutcome, ExtensionError> {
        self.coordinator.update(name).await
    }

    pub async fn reload(
        &self,
        name: &str,
        candidate: ExtensionManifest,
    ) -> Result<ReloadOutcome, ExtensionError> {
        self.coordinator.reload(name, candidate).await
    }

    pub async fn update_all(&self) -> Vec<(String, Result<ReloadOutcome, ExtensionError>)> {
        self.coordinator.update_all().await
    }

    /// Check every installed extension for updates without applying them.
    pub async fn check(&self) -> Vec<(String, Result<UpdateCheck, ExtensionError>)> {
        let results = self.detector.check_all(&self.store.list()).await;
        for check in results.iter().filter_map(|(_, r)| r.as_ref().ok()) {
            self.status.record_update_check(check);
        }
        results
    }

    pub fn list(&self) -> Vec<ExtensionRecord> {
        self.snapshot().extensions
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn resolve_active(&self, extension: &str) -> Option<Arc<ConnectionSet>> {
        self.connections.resolve_active(extension)
    }

    pub async fn call_tool(
        &self,
        extension: &str,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, ToolCallError> {
        self.connections
            .call_tool(extension, server, tool, arguments)
            .await
    }

    /// Run the hooks bound to `event`.
    pub async fn run_hooks(&self, event: &str, context: &serde_json::Value) -> Vec<HookOutcome> {
        self.runner.run(event, context).await
    }

    /// Start background update checks. Does nothing when auto update is
    /// disabled or the poller already runs.
    pub fn start_update_poller(&mut self) -> Option<CancellationToken> {
        if self.config.extensions.disable_auto_update {
            info!("Automatic update checks disabled");
            return None;
        }
        if let Some(ref token) = self.poller {
            return Some(token.clone());
        }

        let token = CancellationToken::new();
        let poller = Arc::new(UpdatePoller::new(
            self.store.clone(),
            self.detector.clone(),
            self.status.clone(),
            self.config.extensions.update_check_interval(),
        ));
        poller.spawn(token.clone());
        self.poller = Some(token.clone());
        Some(token)
    }

    /// Stop the poller and close every connection.
    pub async fn shutdown(&mut self) {
        if let Some(token) = self.poller.take() {
            token.cancel();
        }
        self.connections.shutdown().await;
        info!("Extension host stopped");
    }
}
