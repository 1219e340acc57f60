//! Extension manifest types.
//!
//! [`ExtensionManifest`] is the validated, immutable declaration that one
//! generation of an extension activates. The on-disk JSON shape lives in
//! [`document`] and is converted with [`ManifestDocument::into_manifest`].

mod document;
mod ordered;

pub use document::{HookCommand, HookGroup, HookTable, HooksDocument, ManifestDocument, ServerEntry};

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// File name of the extension manifest inside an extension directory.
pub const MANIFEST_FILE_NAME: &str = "extension.json";
/// Directory holding the sibling hooks declaration.
pub const HOOKS_DIR_NAME: &str = "hooks";
/// File name of the hooks declaration inside [`HOOKS_DIR_NAME`].
pub const HOOKS_FILE_NAME: &str = "hooks.json";

/// Validated extension manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    pub version: semver::Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerSpec>,
    #[serde(default)]
    pub hooks: Vec<HookSpec>,
}

impl ExtensionManifest {
    /// Create an empty manifest.
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: None,
            mcp_servers: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_server(mut self, server: McpServerSpec) -> Self {
        self.mcp_servers.push(server);
        self
    }

    pub fn with_hook(mut self, hook: HookSpec) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Find a server spec by name.
    pub fn server(&self, name: &str) -> Option<&McpServerSpec> {
        self.mcp_servers.iter().find(|s| s.name == name)
    }

    /// Hook specs declared for an event, in declaration order.
    pub fn hooks_for<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a HookSpec> + 'a {
        self.hooks.iter().filter(move |h| h.event == event)
    }

    /// Schema checks that do not depend on the environment.
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_name(&self.name)?;

        let mut seen = HashSet::new();
        for server in &self.mcp_servers {
            if server.name.trim().is_empty() {
                return Err(ManifestError::InvalidServer {
                    server: server.name.clone(),
                    reason: "server name is empty".to_string(),
                });
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ManifestError::DuplicateServer(server.name.clone()));
            }
            server.transport.validate(&server.name)?;
        }

        for hook in &self.hooks {
            hook.validate()?;
        }

        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), ManifestError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphanumeric()
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ManifestError::InvalidName(name.to_string()))
    }
}

/// One MCP server declared by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerSpec {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransportSpec,
    /// Connect and tool discovery budget, overriding the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl McpServerSpec {
    pub fn command(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: McpTransportSpec::Command {
                command: command.into(),
                args,
                env: BTreeMap::new(),
                cwd: None,
            },
            timeout_ms: None,
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: McpTransportSpec::Http {
                url: url.into(),
                headers: BTreeMap::new(),
            },
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// How to reach an MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum McpTransportSpec {
    /// Local subprocess speaking JSON-RPC over stdio.
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// Remote server reached over HTTP POST.
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl McpTransportSpec {
    fn validate(&self, server: &str) -> Result<(), ManifestError> {
        match self {
            McpTransportSpec::Command { command, .. } => {
                if command.trim().is_empty() {
                    return Err(ManifestError::InvalidServer {
                        server: server.to_string(),
                        reason: "command is empty".to_string(),
                    });
                }
            }
            McpTransportSpec::Http { url, .. } => {
                let parsed = url::Url::parse(url).map_err(|e| ManifestError::InvalidServer {
                    server: server.to_string(),
                    reason: format!("invalid url {:?}: {}", url, e),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ManifestError::InvalidServer {
                        server: server.to_string(),
                        reason: format!("unsupported url scheme {:?}", parsed.scheme()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Short human-readable endpoint description.
    pub fn endpoint(&self) -> String {
        match self {
            McpTransportSpec::Command { command, args, .. } if args.is_empty() => command.clone(),
            McpTransportSpec::Command { command, args, .. } => {
                format!("{} {}", command, args.join(" "))
            }
            McpTransportSpec::Http { url, .. } => url.clone(),
        }
    }
}

/// A command hook bound to a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSpec {
    pub event: String,
    pub command: String,
    /// Regular expression matched against the event context's `target`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl HookSpec {
    pub fn new(event: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            command: command.into(),
            matcher: None,
            timeout_ms: None,
        }
    }

    pub fn with_matcher(mut self, matcher: impl Into<String>) -> Self {
        self.matcher = Some(matcher.into());
        self
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.event.trim().is_empty() {
            return Err(ManifestError::InvalidHook {
                event: self.event.clone(),
                reason: "event name is empty".to_string(),
            });
        }
        if self.command.trim().is_empty() {
            return Err(ManifestError::InvalidHook {
                event: self.event.clone(),
                reason: "command is empty".to_string(),
            });
        }
        if let Some(ref matcher) = self.matcher {
            regex::Regex::new(matcher).map_err(|e| ManifestError::InvalidHook {
                event: self.event.clone(),
                reason: format!("invalid matcher {:?}: {}", matcher, e),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
