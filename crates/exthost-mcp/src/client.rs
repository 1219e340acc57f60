//! MCP client implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, info};

use crate::protocol::{
    McpNotification, McpRequest, McpResponse, McpToolDefinition, McpToolResult,
    PROTOCOL_VERSION, methods,
};
use crate::transport::{Transport, TransportError};

/// MCP client for communicating with MCP servers.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    request_id: AtomicI64,
    server_capabilities: Option<serde_json::Value>,
}

impl McpClient {
    /// Create a new MCP client.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            request_id: AtomicI64::new(1),
            server_capabilities: None,
        }
    }

    fn next_id(&self) -> i64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<McpResponse, McpClientError> {
        let id = self.next_id();
        let mut request = McpRequest::new(id, method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        debug!("Sending MCP request: {} (id={})", method, id);

        let response = self.transport.send(request).await?;

        match response.error {
            Some(err) => Err(McpClientError::ServerError {
                code: err.code,
                message: err.message,
            }),
            None => Ok(response),
        }
    }

    /// Perform the `initialize` handshake and announce readiness.
    pub async fn initialize(&mut self) -> Result<serde_json::Value, McpClientError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "clientInfo": {
                "name": "exthost",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let response = self.request(methods::INITIALIZE, Some(params)).await?;
        let result = response.result.unwrap_or(serde_json::Value::Null);
        self.server_capabilities = Some(result.clone());

        // Some servers answer the notification with an empty body or an error status.
        if let Err(e) = self
            .transport
            .notify(McpNotification::new(methods::INITIALIZED))
            .await
        {
            debug!("Initialized notification not delivered: {}", e);
        }

        info!("MCP connection initialized");
        Ok(result)
    }

    /// Capabilities reported by the server during `initialize`.
    pub fn server_capabilities(&self) -> Option<&serde_json::Value> {
        self.server_capabilities.as_ref()
    }

    /// List available tools.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpClientError> {
        let response = self.request(methods::TOOLS_LIST, None).await?;
        let result = response.result.unwrap_or(serde_json::Value::Null);

        let tools = match result.get("tools") {
            Some(tools) => serde_json::from_value(tools.clone())
                .map_err(|e| McpClientError::ProtocolError(e.to_string()))?,
            None => Vec::new(),
        };

        Ok(tools)
    }

    /// Call a tool.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpClientError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });

        let response = self.request(methods::TOOLS_CALL, Some(params)).await?;
        let result = response.result.unwrap_or(serde_json::Value::Null);

        let tool_result: McpToolResult = serde_json::from_value(result)
            .map_err(|e| McpClientError::ProtocolError(e.to_string()))?;

        Ok(tool_result)
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<(), McpClientError> {
        self.transport.close().await?;
        Ok(())
    }
}

/// MCP client errors.
#[derive(Debug, thiserror::Error)]
pub enum McpClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Server error ({code}): {message}")]
    ServerError { code: i32, message: String },

    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
