//! Status publisher.
//!
//! Read-only view over the record store, the connection manager and the hook
//! table. Every snapshot is computed fresh inside the shared side of the
//! publish section, so it never shows one table at generation N and another
//! at N+1. Consumers poll; [`StatusPublisher::wait_for`] wraps the loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use exthost_protocols::{ExtensionManifest, ExtensionRecord, ExtensionStatus, ReloadPhase};

use crate::connection::{ConnectionManager, ConnectionState, ServerReadiness};
use crate::detector::{UpdateCheck, update_pending};
use crate::hooks::HookBindingTable;
use crate::store::RecordStore;
use crate::tracker::TransactionTracker;

const DEFAULT_NOTICE_CAPACITY: usize = 64;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A user-facing transition message.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub at: DateTime<Utc>,
    pub extension: String,
    pub message: String,
}

/// Bounded log of recent notices, oldest first.
pub struct NoticeLog {
    entries: Mutex<VecDeque<Notice>>,
    capacity: usize,
}

impl NoticeLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, extension: &str, message: impl Into<String>) {
        let notice = Notice {
            at: Utc::now(),
            extension: extension.to_string(),
            message: message.into(),
        };
        info!("[{}] {}", notice.extension, notice.message);

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(notice);
    }

    pub fn all(&self) -> Vec<Notice> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn latest_for(&self, extension: &str) -> Option<Notice> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|n| n.extension == extension)
            .cloned()
    }
}

impl Default for NoticeLog {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_CAPACITY)
    }
}

/// One connection of an active generation.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    pub extension: String,
    pub server: String,
    pub generation: u64,
    pub endpoint: String,
    pub state: ConnectionState,
    pub tools: Vec<String>,
}

/// One active hook binding.
#[derive(Debug, Clone, Serialize)]
pub struct HookView {
    pub extension: String,
    pub generation: u64,
    pub event: String,
    pub command: String,
}

/// A running transaction.
#[derive(Debug, Clone, Serialize)]
pub struct InFlightView {
    pub extension: String,
    pub phase: ReloadPhase,
}

/// Point-in-time view of every extension.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Records with `status` and `update_available` resolved.
    pub extensions: Vec<ExtensionRecord>,
    pub connections: Vec<ConnectionView>,
    pub hooks: Vec<HookView>,
    pub readiness: Vec<ServerReadiness>,
    pub in_flight: Vec<InFlightView>,
}

impl StatusSnapshot {
    pub fn extension(&self, name: &str) -> Option<&ExtensionRecord> {
        self.extensions.iter().find(|r| r.name == name)
    }

    pub fn connection(&self, extension: &str, server: &str) -> Option<&ConnectionView> {
        self.connections
            .iter()
            .find(|c| c.extension == extension && c.server == server)
    }

    pub fn hooks_for(&self, extension: &str) -> impl Iterator<Item = &HookView> {
        self.hooks.iter().filter(move |h| h.extension == extension)
    }

    pub fn is_in_flight(&self, extension: &str) -> bool {
        self.in_flight.iter().any(|t| t.extension == extension)
    }
}

/// Publishes snapshots and notices.
pub struct StatusPublisher {
    store: Arc<RecordStore>,
    connections: Arc<ConnectionManager>,
    hooks: Arc<HookBindingTable>,
    tracker: Arc<TransactionTracker>,
    /// Latest manifest seen at each extension's source.
    candidates: DashMap<String, Arc<ExtensionManifest>>,
    notices: NoticeLog,
}

impl StatusPublisher {
    pub fn new(
        store: Arc<RecordStore>,
        connections: Arc<ConnectionManager>,
        hooks: Arc<HookBindingTable>,
        tracker: Arc<TransactionTracker>,
    ) -> Self {
        Self {
            store,
            connections,
            hooks,
            tracker,
            candidates: DashMap::new(),
            notices: NoticeLog::default(),
        }
    }

    /// Compute a fresh snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        let _section = self.tracker.read_section();

        let in_flight: Vec<_> = self
            .tracker
            .in_flight()
            .into_iter()
            .map(|(extension, phase)| InFlightView { extension, phase })
            .collect();

        let mut extensions = self.store.list();
        for record in &mut extensions {
            if in_flight.iter().any(|t| t.extension == record.name) {
                record.status = ExtensionStatus::Reloading;
            }
            record.update_available = self
                .candidates
                .get(&record.name)
                .is_some_and(|candidate| update_pending(&record.manifest, &candidate));
        }

        let connections = self
            .connections
            .active_sets()
            .iter()
            .flat_map(|set| {
                set.iter().map(|conn| ConnectionView {
                    extension: conn.extension().to_string(),
                    server: conn.server().to_string(),
                    generation: conn.generation(),
                    endpoint: conn.endpoint().to_string(),
                    state: conn.state(),
                    tools: conn.tool_names(),
                })
            })
            .collect();

        let hooks = extensions
            .iter()
            .filter_map(|r| self.hooks.active(&r.name))
            .flat_map(|active| {
                active
                    .bindings
                    .iter()
                    .map(|b| HookView {
                        extension: b.extension.clone(),
                        generation: b.generation,
                        event: b.spec.event.clone(),
                        command: b.spec.command.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        StatusSnapshot {
            taken_at: Utc::now(),
            extensions,
            connections,
            hooks,
            readiness: self.connections.readiness().entries(),
            in_flight,
        }
    }

    /// Poll snapshots until `predicate` holds or `timeout` elapses.
    pub async fn wait_for<F>(&self, mut predicate: F, timeout: Duration) -> Option<StatusSnapshot>
    where
        F: FnMut(&StatusSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.snapshot();
            if predicate(&snapshot) {
                return Some(snapshot);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Merge a detector result into the displayed update flag.
    pub fn record_update_check(&self, check: &UpdateCheck) {
        let installed = self.store.get(&check.extension).ok();
        let pending = installed
            .as_ref()
            .is_some_and(|r| check.pending(&r.manifest));

        let previous = self
            .candidates
            .insert(check.extension.clone(), Arc::new(check.candidate.clone()));

        let announced = previous.is_some_and(|p| *p == check.candidate);
        if pending && !announced {
            self.notices.push(
                &check.extension,
                format!(
                    "update available: {} → {}",
                    check.installed,
                    check.candidate_version()
                ),
            );
        }
    }

    /// Remember the manifest found at an extension's source.
    pub(crate) fn set_candidate(&self, extension: &str, candidate: ExtensionManifest) {
        self.candidates
            .insert(extension.to_string(), Arc::new(candidate));
    }

    pub(crate) fn forget(&self, extension: &str) {
        self.candidates.remove(extension);
    }

    pub fn notify(&self, extension: &str, message: impl Into<String>) {
        self.notices.push(extension, message);
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.all()
    }

    pub fn latest_notice(&self, extension: &str) -> Option<Notice> {
        self.notices.latest_for(extension)
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
