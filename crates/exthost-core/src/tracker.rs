//! In-flight reload transactions.
//!
//! At most one transaction per extension name. The guard returned by
//! [`TransactionTracker::begin`] releases the name when dropped, whatever
//! path the transaction leaves by.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use exthost_protocols::{ExtensionError, ReloadPhase};

/// Tracks running transactions and guards the publish critical section.
#[derive(Default)]
pub struct TransactionTracker {
    in_flight: DashMap<String, ReloadPhase>,
    publish: RwLock<()>,
}

impl TransactionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name`, failing if a transaction for it is already running.
    pub fn begin(self: &Arc<Self>, name: &str) -> Result<TransactionGuard, ExtensionError> {
        match self.in_flight.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ExtensionError::AlreadyInProgress(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(ReloadPhase::Validating);
                debug!("Transaction started for {}", name);
                Ok(TransactionGuard {
                    tracker: self.clone(),
                    name: name.to_string(),
                })
            }
        }
    }

    pub fn phase(&self, name: &str) -> Option<ReloadPhase> {
        self.in_flight.get(name).map(|p| *p)
    }

    pub fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight.contains_key(name)
    }

    /// Running transactions, sorted by name.
    pub fn in_flight(&self) -> Vec<(String, ReloadPhase)> {
        let mut entries: Vec<_> = self
            .in_flight
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Exclusive section in which a generation is published across tables.
    pub(crate) fn publish_section(&self) -> RwLockWriteGuard<'_, ()> {
        self.publish.write()
    }

    /// Shared section for readers that need a consistent view across tables.
    pub(crate) fn read_section(&self) -> RwLockReadGuard<'_, ()> {
        self.publish.read()
    }
}

/// Ownership of one extension name for the duration of a transaction.
pub struct TransactionGuard {
    tracker: Arc<TransactionTracker>,
    name: String,
}

impl TransactionGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_phase(&self, phase: ReloadPhase) {
        if let Some(mut entry) = self.tracker.in_flight.get_mut(&self.name) {
            *entry = phase;
        }
        debug!("{}: {}", self.name, phase);
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        self.tracker.in_flight.remove(&self.name);
    }
}
