//! Transport construction from server specs.

use std::sync::Arc;

use async_trait::async_trait;

use exthost_mcp::{
    HttpTransport, HttpTransportConfig, StdioTransport, StdioTransportConfig, Transport,
    TransportError,
};
use exthost_protocols::{McpServerSpec, McpTransportSpec};

/// Opens a transport for a server spec.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, spec: &McpServerSpec) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Spawns command servers and dials HTTP servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, spec: &McpServerSpec) -> Result<Arc<dyn Transport>, TransportError> {
        match spec.transport {
            McpTransportSpec::Command {
                ref command,
                ref args,
                ref env,
                ref cwd,
            } => {
                let config = StdioTransportConfig {
                    command: command.clone(),
                    args: args.clone(),
                    env: env.clone(),
                    cwd: cwd.clone(),
                };
                Ok(Arc::new(StdioTransport::spawn(&config).await?))
            }
            McpTransportSpec::Http {
                ref url,
                ref headers,
            } => {
                let config = HttpTransportConfig::new(url.clone()).with_headers(headers.clone());
                Ok(Arc::new(HttpTransport::new(config)?))
            }
        }
    }
}
