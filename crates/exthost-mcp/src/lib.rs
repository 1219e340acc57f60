//! MCP (Model Context Protocol) client for exthost.
//!
//! Speaks JSON-RPC to MCP servers declared by extensions. Supports two
//! transports: a local subprocess over stdio and a remote server over HTTP.

mod client;
mod http_transport;
mod protocol;
mod transport;

pub use client::{McpClient, McpClientError};
pub use http_transport::{HttpTransport, HttpTransportConfig};
pub use protocol::{
    McpContent, McpError, McpNotification, McpRequest, McpResponse, McpToolDefinition,
    McpToolResult, RequestId, methods,
};
pub use transport::{StdioTransport, StdioTransportConfig, Transport, TransportError};
