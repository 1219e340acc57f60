//! Connection manager.
//!
//! A generation's connections are first staged by [`ConnectionManager::activate`],
//! then published by [`ConnectionManager::promote`], which replaces the
//! extension's active set with a single pointer swap. Readers resolve through
//! [`ConnectionManager::resolve_active`] and never observe a set that mixes
//! generations.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use exthost_mcp::{McpClient, McpClientError, McpToolDefinition, McpToolResult};
use exthost_protocols::{ExtensionError, McpServerSpec};

use super::{
    ActivationReport, ConnectionSet, ConnectionState, Connector, McpConnection, ReadinessIndex,
    ServerActivation, ServerStatus,
};
use crate::error::ToolCallError;

/// Owns every live MCP connection.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    active: DashMap<String, Arc<ConnectionSet>>,
    staged: DashMap<(String, u64), Arc<ConnectionSet>>,
    readiness: ReadinessIndex,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            active: DashMap::new(),
            staged: DashMap::new(),
            readiness: ReadinessIndex::new(),
        }
    }

    /// Connect every server of a generation concurrently and stage the result.
    ///
    /// Each server fails independently; the report lists every server in
    /// manifest order. Nothing becomes visible until [`promote`].
    ///
    /// [`promote`]: ConnectionManager::promote
    pub async fn activate(
        &self,
        extension: &str,
        generation: u64,
        specs: &[McpServerSpec],
    ) -> ActivationReport {
        debug!(
            "Activating {} MCP servers for {} (generation {})",
            specs.len(),
            extension,
            generation
        );

        let connections: Vec<Arc<McpConnection>> = join_all(
            specs
                .iter()
                .map(|spec| self.connect_one(extension, generation, spec)),
        )
        .await
        .into_iter()
        .map(Arc::new)
        .collect();

        let servers = connections
            .iter()
            .map(|conn| ServerActivation {
                server: conn.server().to_string(),
                status: match conn.state() {
                    ConnectionState::Ready => ServerStatus::Ready {
                        tools: conn.tools().len(),
                    },
                    ConnectionState::Error(reason) => ServerStatus::Failed { reason },
                    other => ServerStatus::Failed {
                        reason: other.to_string(),
                    },
                },
            })
            .collect();

        let set = Arc::new(ConnectionSet::new(extension, generation, connections));
        if let Some(previous) = self
            .staged
            .insert((extension.to_string(), generation), set)
        {
            previous.close_all().await;
        }

        ActivationReport {
            extension: extension.to_string(),
            generation,
            servers,
        }
    }

    async fn connect_one(
        &self,
        extension: &str,
        generation: u64,
        spec: &McpServerSpec,
    ) -> McpConnection {
        let endpoint = spec.transport.endpoint();
        let limit = spec
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.connect_timeout);

        match timeout(limit, self.handshake(spec)).await {
            Ok(Ok((client, tools))) => {
                info!(
                    "{} tools ready from server {} ({} generation {})",
                    tools.len(),
                    spec.name,
                    extension,
                    generation
                );
                McpConnection::ready(extension, &spec.name, generation, endpoint, client, tools)
            }
            Ok(Err(e)) => {
                warn!("MCP server {} of {} failed: {}", spec.name, extension, e);
                McpConnection::failed(extension, &spec.name, generation, endpoint, e.to_string())
            }
            Err(_) => {
                let err = ExtensionError::ConnectionTimeout {
                    server: spec.name.clone(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                };
                warn!("{}", err);
                McpConnection::failed(extension, &spec.name, generation, endpoint, err.to_string())
            }
        }
    }

    async fn handshake(
        &self,
        spec: &McpServerSpec,
    ) -> Result<(McpClient, Vec<McpToolDefinition>), McpClientError> {
        let transport = self.connector.connect(spec).await?;
        let mut client = McpClient::new(transport);

        let discovered = async {
            client.initialize().await?;
            client.list_tools().await
        }
        .await;

        match discovered {
            Ok(tools) => Ok((client, tools)),
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    debug!("Closing failed MCP server {}: {}", spec.name, close_err);
                }
                Err(e)
            }
        }
    }

    /// Publish a staged generation. Returns the superseded set, which the
    /// caller closes once no longer needed.
    pub fn promote(&self, extension: &str, generation: u64) -> Option<Arc<ConnectionSet>> {
        let Some((_, set)) = self.staged.remove(&(extension.to_string(), generation)) else {
            warn!(
                "No staged connections for {} generation {}",
                extension, generation
            );
            return None;
        };

        self.readiness.publish(&set);
        self.active.insert(extension.to_string(), set)
    }

    /// Withdraw a staged generation without closing it.
    pub fn discard_staged(&self, extension: &str, generation: u64) -> Option<Arc<ConnectionSet>> {
        self.staged
            .remove(&(extension.to_string(), generation))
            .map(|(_, set)| set)
    }

    /// Close every connection of a generation, staged or active. Best-effort.
    pub async fn deactivate(&self, extension: &str, generation: u64) {
        if let Some(staged) = self.discard_staged(extension, generation) {
            staged.close_all().await;
        }

        let active = self
            .active
            .remove_if(extension, |_, set| set.generation() == generation);
        if let Some((_, set)) = active {
            self.readiness.remove_extension(extension);
            set.close_all().await;
            info!("Deactivated {} generation {}", extension, generation);
        }
    }

    /// Withdraw an extension's active set without closing it.
    pub fn unpublish(&self, extension: &str) -> Option<Arc<ConnectionSet>> {
        let (_, set) = self.active.remove(extension)?;
        self.readiness.remove_extension(extension);
        Some(set)
    }

    /// The latest committed generation's connections.
    pub fn resolve_active(&self, extension: &str) -> Option<Arc<ConnectionSet>> {
        self.active.get(extension).map(|set| set.clone())
    }

    pub fn active_sets(&self) -> Vec<Arc<ConnectionSet>> {
        let mut sets: Vec<_> = self.active.iter().map(|e| e.value().clone()).collect();
        sets.sort_by(|a, b| a.extension().cmp(b.extension()));
        sets
    }

    /// Call a tool on the active generation of an extension.
    pub async fn call_tool(
        &self,
        extension: &str,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, ToolCallError> {
        let set = self
            .resolve_active(extension)
            .ok_or_else(|| ToolCallError::NotActive(extension.to_string()))?;
        let conn = set.get(server).ok_or_else(|| ToolCallError::UnknownServer {
            extension: extension.to_string(),
            server: server.to_string(),
        })?;
        conn.call_tool(tool, arguments).await
    }

    pub fn readiness(&self) -> &ReadinessIndex {
        &self.readiness
    }

    /// Close everything. Used at shutdown.
    pub async fn shutdown(&self) {
        let staged: Vec<_> = self.staged.iter().map(|e| e.value().clone()).collect();
        self.staged.clear();
        let active: Vec<_> = self.active.iter().map(|e| e.value().clone()).collect();
        self.active.clear();

        for set in staged.iter().chain(active.iter()) {
            set.close_all().await;
        }
        for set in &active {
            self.readiness.remove_extension(set.extension());
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
