//! Update detection.
//!
//! [`UpdateDetector`] compares an installed record with the manifest
//! currently published at its source. It never mutates anything; the
//! [`UpdatePoller`] feeds its results to the status publisher.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use exthost_protocols::{ExtensionError, ExtensionManifest, ExtensionRecord};

use crate::source::ManifestSource;
use crate::status::StatusPublisher;
use crate::store::RecordStore;

/// Result of one update check.
#[derive(Debug, Clone)]
pub struct UpdateCheck {
    pub extension: String,
    pub installed: semver::Version,
    /// The candidate's version is strictly greater than the installed one.
    pub available: bool,
    /// Manifest found at the source.
    pub candidate: ExtensionManifest,
}

impl UpdateCheck {
    pub fn candidate_version(&self) -> &semver::Version {
        &self.candidate.version
    }

    /// The source manifest differs from the installed one in any way.
    pub fn drifted(&self, installed: &ExtensionManifest) -> bool {
        self.candidate != *installed
    }

    /// Whether applying the candidate would change the installed generation.
    pub fn pending(&self, installed: &ExtensionManifest) -> bool {
        update_pending(installed, &self.candidate)
    }
}

/// A candidate is worth applying when it is newer, or carries the same
/// version with different content. Older candidates are never offered.
pub fn update_pending(installed: &ExtensionManifest, candidate: &ExtensionManifest) -> bool {
    match candidate.version.cmp(&installed.version) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => candidate != installed,
        std::cmp::Ordering::Less => false,
    }
}

/// Compares installed records against their sources.
pub struct UpdateDetector {
    source: Arc<dyn ManifestSource>,
}

impl UpdateDetector {
    pub fn new(source: Arc<dyn ManifestSource>) -> Self {
        Self { source }
    }

    /// Check one record. Read-only and idempotent.
    pub async fn check_for_update(
        &self,
        record: &ExtensionRecord,
    ) -> Result<UpdateCheck, ExtensionError> {
        let candidate = self.source.fetch(&record.source).await?;
        let installed = record.version().clone();
        let available = candidate.version > installed;

        debug!(
            "Update check for {}: installed {}, source {}",
            record.name, installed, candidate.version
        );

        Ok(UpdateCheck {
            extension: record.name.clone(),
            installed,
            available,
            candidate,
        })
    }

    /// Check several records concurrently.
    pub async fn check_all(
        &self,
        records: &[ExtensionRecord],
    ) -> Vec<(String, Result<UpdateCheck, ExtensionError>)> {
        let checks = records.iter().map(|record| async move {
            (record.name.clone(), self.check_for_update(record).await)
        });
        join_all(checks).await
    }
}

/// Periodically runs the detector over every installed extension.
pub struct UpdatePoller {
    store: Arc<RecordStore>,
    detector: Arc<UpdateDetector>,
    status: Arc<StatusPublisher>,
    interval: Duration,
}

impl UpdatePoller {
    pub fn new(
        store: Arc<RecordStore>,
        detector: Arc<UpdateDetector>,
        status: Arc<StatusPublisher>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            detector,
            status,
            interval,
        }
    }

    /// Run one pass. Returns the number of extensions with an update.
    pub async fn poll_once(&self) -> usize {
        let records = self.store.list();
        let mut available = 0;

        for (name, result) in self.detector.check_all(&records).await {
            match result {
                Ok(check) => {
                    if check.available {
                        available += 1;
                    }
                    self.status.record_update_check(&check);
                }
                Err(e) => warn!("Update check failed for {}: {}", name, e),
            }
        }

        available
    }

    /// Poll until `token` is cancelled.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Update poller started (interval {:?})", self.interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    count = self.poll_once() => {
                        if count > 0 {
                            info!("{} extension update(s) available", count);
                        }
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            info!("Update poller stopped");
        })
    }
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
