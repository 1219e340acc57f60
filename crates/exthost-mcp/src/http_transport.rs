//! HTTP transport for MCP communication.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, header};
use serde::{Deserialize, Serialize};

use crate::protocol::{McpNotification, McpRequest, McpResponse};
use crate::transport::{Transport, TransportError};

/// HTTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    /// Endpoint URL for the MCP server.
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Authorization header value (e.g., "Bearer token").
    #[serde(default)]
    pub authorization: Option<String>,
    /// Custom headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_timeout() -> u64 {
    30
}

impl HttpTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_seconds: default_timeout(),
            authorization: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// HTTP transport for MCP servers.
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            client,
            config,
            closed: AtomicBool::new(false),
        })
    }

    fn post(&self) -> RequestBuilder {
        let mut req = self
            .client
            .post(&self.config.url)
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(ref auth) = self.config.authorization {
            req = req.header(header::AUTHORIZATION, auth);
        }

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        req
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, TransportError> {
        self.ensure_open()?;

        let response = self
            .post()
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {}: {}", status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let mcp_response: McpResponse = serde_json::from_str(&body)?;

        Ok(mcp_response)
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), TransportError> {
        self.ensure_open()?;

        let response = self
            .post()
            .json(&notification)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!("HTTP {}", response.status())));
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
