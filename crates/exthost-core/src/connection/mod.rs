//! Live MCP connections, one set per extension generation.

mod connector;
mod manager;
mod readiness;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use exthost_mcp::{McpClient, McpToolDefinition, McpToolResult};

use crate::error::ToolCallError;

pub use connector::{Connector, DefaultConnector};
pub use manager::ConnectionManager;
pub use readiness::{ReadinessIndex, ServerReadiness};

/// Connection readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Ready,
    Error(String),
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Ready => f.write_str("ready"),
            ConnectionState::Error(reason) => write!(f, "error: {}", reason),
            ConnectionState::Closed => f.write_str("closed"),
        }
    }
}

/// One MCP server of one extension generation.
pub struct McpConnection {
    extension: String,
    server: String,
    generation: u64,
    endpoint: String,
    client: Option<McpClient>,
    tools: Vec<McpToolDefinition>,
    state: RwLock<ConnectionState>,
}

impl McpConnection {
    pub(crate) fn ready(
        extension: &str,
        server: &str,
        generation: u64,
        endpoint: String,
        client: McpClient,
        tools: Vec<McpToolDefinition>,
    ) -> Self {
        Self {
            extension: extension.to_string(),
            server: server.to_string(),
            generation,
            endpoint,
            client: Some(client),
            tools,
            state: RwLock::new(ConnectionState::Ready),
        }
    }

    pub(crate) fn failed(
        extension: &str,
        server: &str,
        generation: u64,
        endpoint: String,
        reason: String,
    ) -> Self {
        Self {
            extension: extension.to_string(),
            server: server.to_string(),
            generation,
            endpoint,
            client: None,
            tools: Vec::new(),
            state: RwLock::new(ConnectionState::Error(reason)),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.read(), ConnectionState::Ready)
    }

    /// Tools discovered when the connection came up.
    pub fn tools(&self) -> &[McpToolDefinition] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, ToolCallError> {
        let client = match self.client {
            Some(ref client) if self.is_ready() => client,
            _ => {
                return Err(ToolCallError::ServerUnavailable {
                    extension: self.extension.clone(),
                    server: self.server.clone(),
                });
            }
        };
        Ok(client.call_tool(tool, arguments).await?)
    }

    /// Close the transport. Failures are logged, never returned.
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }

        if let Some(ref client) = self.client {
            if let Err(e) = client.close().await {
                warn!(
                    "Failed to close MCP server {} of {} (generation {}): {}",
                    self.server, self.extension, self.generation, e
                );
            }
        }
    }
}

/// All connections of one extension generation, in manifest order.
pub struct ConnectionSet {
    extension: String,
    generation: u64,
    connections: Vec<Arc<McpConnection>>,
}

impl ConnectionSet {
    pub(crate) fn new(extension: &str, generation: u64, connections: Vec<Arc<McpConnection>>) -> Self {
        Self {
            extension: extension.to_string(),
            generation,
            connections,
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, server: &str) -> Option<&Arc<McpConnection>> {
        self.connections.iter().find(|c| c.server == server)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<McpConnection>> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ready_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_ready()).count()
    }

    /// Names of every discovered tool, qualified by server.
    pub fn tool_names(&self) -> Vec<(String, String)> {
        self.connections
            .iter()
            .filter(|c| c.is_ready())
            .flat_map(|c| c.tools.iter().map(|t| (c.server.clone(), t.name.clone())))
            .collect()
    }

    pub(crate) async fn close_all(&self) {
        futures::future::join_all(self.connections.iter().map(|c| c.close())).await;
    }
}

/// Outcome of activating one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ServerStatus {
    Ready { tools: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerActivation {
    pub server: String,
    pub status: ServerStatus,
}

/// Per-server result of [`ConnectionManager::activate`].
#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub extension: String,
    pub generation: u64,
    pub servers: Vec<ServerActivation>,
}

impl ActivationReport {
    pub fn status(&self, server: &str) -> Option<&ServerStatus> {
        self.servers.iter().find(|s| s.server == server).map(|s| &s.status)
    }

    pub fn total(&self) -> usize {
        self.servers.len()
    }

    pub fn ready_count(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| matches!(s.status, ServerStatus::Ready { .. }))
            .count()
    }

    pub fn failed_servers(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter(|s| matches!(s.status, ServerStatus::Failed { .. }))
            .map(|s| s.server.clone())
            .collect()
    }

    /// `server: reason` for every failed server.
    pub fn failures(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter_map(|s| match s.status {
                ServerStatus::Failed { ref reason } => Some(format!("{}: {}", s.server, reason)),
                ServerStatus::Ready { .. } => None,
            })
            .collect()
    }
}
