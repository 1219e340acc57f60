//! Transport layer for MCP communication.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::protocol::{McpNotification, McpRequest, McpResponse};

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and receive its response.
    async fn send(&self, request: McpRequest) -> Result<McpResponse, TransportError>;

    /// Send a notification; no response is expected.
    async fn notify(&self, _notification: McpNotification) -> Result<(), TransportError> {
        Ok(())
    }

    /// Close the transport.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Process error: {0}")]
    Process(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection closed")]
    Closed,
}

/// Subprocess launch parameters.
#[derive(Debug, Clone, Default)]
pub struct StdioTransportConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// Stdio transport for subprocess MCP servers.
///
/// Requests are serialized over the pipe pair. Closing cancels whatever
/// request is in flight, so a server that stops answering cannot hold the
/// transport open.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    io: Mutex<Option<(ChildStdin, BufReader<ChildStdout>)>>,
    shutdown: CancellationToken,
}

impl StdioTransport {
    /// Create a new stdio transport by spawning a process.
    pub async fn spawn(config: &StdioTransportConfig) -> Result<Self, TransportError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(ref cwd) = config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            TransportError::Process(format!("Failed to spawn {}: {}", config.command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Process("Failed to capture stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Process("Failed to capture stdout".to_string()))?;

        Ok(Self {
            child: Mutex::new(Some(child)),
            io: Mutex::new(Some((stdin, BufReader::new(stdout)))),
            shutdown: CancellationToken::new(),
        })
    }

    async fn write_line<T: serde::Serialize>(
        stdin: &mut ChildStdin,
        message: &T,
    ) -> Result<(), TransportError> {
        let json = serde_json::to_string(message)?;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn exchange(
        stdin: &mut ChildStdin,
        stdout: &mut BufReader<ChildStdout>,
        request: &McpRequest,
    ) -> Result<McpResponse, TransportError> {
        Self::write_line(stdin, request).await?;

        // Servers may interleave notifications and logs with responses.
        loop {
            let mut line = String::new();
            if stdout.read_line(&mut line).await? == 0 {
                return Err(TransportError::Closed);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<McpResponse>(trimmed) {
                Ok(response) if response.id == request.id => return Ok(response),
                Ok(response) => debug!("Skipping response for id {:?}", response.id),
                Err(_) => debug!("Skipping non-response line from MCP server"),
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, TransportError> {
        let mut guard = tokio::select! {
            guard = self.io.lock() => guard,
            _ = self.shutdown.cancelled() => return Err(TransportError::Closed),
        };
        let (stdin, stdout) = guard.as_mut().ok_or(TransportError::Closed)?;

        tokio::select! {
            result = Self::exchange(stdin, stdout, &request) => result,
            _ = self.shutdown.cancelled() => Err(TransportError::Closed),
        }
    }

    async fn notify(&self, notification: McpNotification) -> Result<(), TransportError> {
        let mut guard = tokio::select! {
            guard = self.io.lock() => guard,
            _ = self.shutdown.cancelled() => return Err(TransportError::Closed),
        };
        let (stdin, _) = guard.as_mut().ok_or(TransportError::Closed)?;
        Self::write_line(stdin, &notification).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Cancel first: an in-flight request holds `io` until it returns.
        self.shutdown.cancel();

        if let Some(mut child) = self.child.lock().await.take() {
            child.kill().await?;
        }

        *self.io.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;

    #[test]
    fn test_closed_error() {
        let err = TransportError::Closed;
        assert_eq!(err.to_string(), "Connection closed");
    }

    #[test]
    fn test_transport_error_process() {
        let err = TransportError::Process("process crashed".to_string());
        assert_eq!(err.to_string(), "Process error: process crashed");
    }

    #[test]
    fn test_transport_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let transport_err: TransportError = io_err.into();
        assert!(transport_err.to_string().contains("IO error"));
    }

    #[tokio::test]
    async fn test_spawn_missing_command() {
        let config = StdioTransportConfig {
            command: "/nonexistent/exthost-mcp-server".to_string(),
            ..Default::default()
        };
        let result = StdioTransport::spawn(&config).await;
        assert!(matches!(result, Err(TransportError::Process(_))));
    }

    #[tokio::test]
    async fn test_stdio_roundtrip_skips_noise() {
        // A shell "server" that prints a log line, then echoes a canned response.
        let script = r#"read line; echo 'starting up'; echo '{"jsonrpc":"2.0","id":7,"result":{"ok":true}}'; sleep 5"#;
        let config = StdioTransportConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        };

        let transport = StdioTransport::spawn(&config).await.unwrap();
        let response = transport.send(McpRequest::new(7i64, "tools/list")).await.unwrap();
        assert_eq!(response.id, RequestId::Number(7));
        assert_eq!(response.result.unwrap()["ok"], true);

        transport.close().await.unwrap();
        let after_close = transport.send(McpRequest::new(8i64, "tools/list")).await;
        assert!(matches!(after_close, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_close_cancels_pending_request() {
        // Reads the request, then never answers.
        let config = StdioTransportConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "read line; sleep 30".to_string()],
            ..Default::default()
        };

        let transport = std::sync::Arc::new(StdioTransport::spawn(&config).await.unwrap());
        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(McpRequest::new(1i64, "tools/call")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        tokio::time::timeout(std::time::Duration::from_secs(2), transport.close())
            .await
            .expect("close must not wait for the pending request")
            .unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_stdio_eof_is_closed() {
        let config = StdioTransportConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "read line".to_string()],
            ..Default::default()
        };

        let transport = StdioTransport::spawn(&config).await.unwrap();
        let result = transport.send(McpRequest::new(1i64, "initialize")).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
