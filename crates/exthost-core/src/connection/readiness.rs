//! Process-wide index of ready MCP servers.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::Serialize;

use super::ConnectionSet;

/// Readiness of one server of an active generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerReadiness {
    pub extension: String,
    pub server: String,
    pub generation: u64,
    pub ready: bool,
    pub tools: usize,
}

impl ServerReadiness {
    /// Human readable line such as `2 tools ready from server docs`.
    pub fn message(&self) -> String {
        if self.ready {
            format!("{} tools ready from server {}", self.tools, self.server)
        } else {
            format!("server {} unavailable", self.server)
        }
    }
}

/// Readiness of every server of every active generation.
#[derive(Default)]
pub struct ReadinessIndex {
    entries: RwLock<BTreeMap<(String, String), ServerReadiness>>,
}

impl ReadinessIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entries of `set`'s extension with `set`.
    pub(crate) fn publish(&self, set: &ConnectionSet) {
        let mut entries = self.entries.write();
        entries.retain(|(ext, _), _| ext != set.extension());
        for conn in set.iter() {
            entries.insert(
                (set.extension().to_string(), conn.server().to_string()),
                ServerReadiness {
                    extension: set.extension().to_string(),
                    server: conn.server().to_string(),
                    generation: set.generation(),
                    ready: conn.is_ready(),
                    tools: conn.tools().len(),
                },
            );
        }
    }

    pub(crate) fn remove_extension(&self, extension: &str) {
        self.entries.write().retain(|(ext, _), _| ext != extension);
    }

    pub fn get(&self, extension: &str, server: &str) -> Option<ServerReadiness> {
        self.entries
            .read()
            .get(&(extension.to_string(), server.to_string()))
            .cloned()
    }

    pub fn entries(&self) -> Vec<ServerReadiness> {
        self.entries.read().values().cloned().collect()
    }

    pub fn ready_tool_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| e.ready)
            .map(|e| e.tools)
            .sum()
    }
}
