//! On-disk manifest documents.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

use super::{ordered, ExtensionManifest, HookSpec, McpServerSpec, McpTransportSpec};
use crate::error::ManifestError;

/// `extension.json` as written by extension authors.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "ordered::entries")]
    pub mcp_servers: Vec<(String, ServerEntry)>,
    /// Inline hooks, used when no sibling hooks document exists.
    #[serde(default)]
    pub hooks: Option<HookTable>,
}

/// One entry of the `mcpServers` map.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    #[serde(alias = "url")]
    pub http_url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Milliseconds.
    pub timeout: Option<u64>,
}

impl ServerEntry {
    fn into_spec(self, name: String) -> Result<McpServerSpec, ManifestError> {
        let transport = match (self.command, self.http_url) {
            (Some(command), None) => McpTransportSpec::Command {
                command,
                args: self.args,
                env: self.env,
                cwd: self.cwd,
            },
            (None, Some(url)) => McpTransportSpec::Http {
                url,
                headers: self.headers,
            },
            (Some(_), Some(_)) => {
                return Err(ManifestError::InvalidServer {
                    server: name,
                    reason: "declares both command and httpUrl".to_string(),
                });
            }
            (None, None) => {
                return Err(ManifestError::InvalidServer {
                    server: name,
                    reason: "must declare either command or httpUrl".to_string(),
                });
            }
        };

        Ok(McpServerSpec {
            name,
            transport,
            timeout_ms: self.timeout,
        })
    }
}

/// Event name to hook groups, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct HookTable(pub Vec<(String, Vec<HookGroup>)>);

impl<'de> Deserialize<'de> for HookTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        ordered::entries(deserializer).map(HookTable)
    }
}

impl HookTable {
    fn into_specs(self) -> Result<Vec<HookSpec>, ManifestError> {
        let mut specs = Vec::new();
        for (event, groups) in self.0 {
            for group in groups {
                for hook in group.hooks {
                    if hook.kind != "command" {
                        return Err(ManifestError::InvalidHook {
                            event,
                            reason: format!("unsupported hook type {:?}", hook.kind),
                        });
                    }
                    specs.push(HookSpec {
                        event: event.clone(),
                        command: hook.command,
                        matcher: group.matcher.clone(),
                        timeout_ms: hook.timeout,
                    });
                }
            }
        }
        Ok(specs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookGroup {
    #[serde(default)]
    pub matcher: Option<String>,
    #[serde(default)]
    pub hooks: Vec<HookCommand>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookCommand {
    #[serde(rename = "type", default = "default_hook_type")]
    pub kind: String,
    pub command: String,
    /// Milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_hook_type() -> String {
    "command".to_string()
}

/// `hooks/hooks.json`, the sibling hooks declaration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HooksDocument {
    #[serde(default)]
    pub hooks: HookTable,
}

impl HooksDocument {
    pub fn parse(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl ManifestDocument {
    pub fn parse(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert and validate. A sibling hooks document replaces inline hooks.
    pub fn into_manifest(
        self,
        hooks: Option<HooksDocument>,
    ) -> Result<ExtensionManifest, ManifestError> {
        let version =
            semver::Version::parse(self.version.trim()).map_err(|e| ManifestError::InvalidVersion {
                version: self.version.clone(),
                reason: e.to_string(),
            })?;

        let mcp_servers = self
            .mcp_servers
            .into_iter()
            .map(|(name, entry)| entry.into_spec(name))
            .collect::<Result<Vec<_>, _>>()?;

        let table = match hooks {
            Some(doc) => doc.hooks,
            None => self.hooks.unwrap_or_default(),
        };

        let manifest = ExtensionManifest {
            name: self.name,
            version,
            description: self.description,
            mcp_servers,
            hooks: table.into_specs()?,
        };
        manifest.validate()?;
        Ok(manifest)
    }
}
