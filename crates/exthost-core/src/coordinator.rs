//! Reload coordinator.
//!
//! Every lifecycle operation runs as a transaction owned by a
//! [`TransactionGuard`]:
//!
//! ```text
//! Validating -> Connecting -> Swapping -> Committed
//!      \             \            \
//!       +-------------+------------+----> RolledBack
//! ```
//!
//! The new generation is fully staged (hooks bound, servers connected) before
//! anything is published. The swap persists the record first, then publishes
//! connections, hooks and record together inside the publish section. A
//! failure at any point before the swap leaves the previous generation
//! serving as if nothing happened.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use exthost_config::PartialActivationPolicy;
use exthost_protocols::{
    ExtensionError, ExtensionManifest, ExtensionRecord, ExtensionSource, ExtensionStatus,
    ExtensionWarning, ManifestError, ReloadPhase,
};

use crate::connection::{ActivationReport, ConnectionManager, ConnectionSet, ServerStatus};
use crate::detector::update_pending;
use crate::hooks::HookBindingTable;
use crate::source::ManifestSource;
use crate::status::StatusPublisher;
use crate::store::RecordStore;
use crate::tracker::{TransactionGuard, TransactionTracker};

/// Result of a successful lifecycle operation.
#[derive(Debug, Clone)]
pub enum ReloadOutcome {
    /// A new generation is live.
    Committed {
        extension: String,
        /// `None` for a fresh install.
        from_version: Option<String>,
        to_version: String,
        generation: u64,
        warnings: Vec<ExtensionWarning>,
        report: ActivationReport,
    },
    /// The source offers nothing newer than the installed generation.
    UpToDate { extension: String, version: String },
    /// Hot reload is disabled: the update is persisted and applies on the
    /// next start. The previous generation keeps serving.
    RestartRequired {
        extension: String,
        from_version: String,
        to_version: String,
    },
}

impl ReloadOutcome {
    pub fn extension(&self) -> &str {
        match self {
            ReloadOutcome::Committed { extension, .. }
            | ReloadOutcome::UpToDate { extension, .. }
            | ReloadOutcome::RestartRequired { extension, .. } => extension,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, ReloadOutcome::Committed { .. })
    }
}

impl std::fmt::Display for ReloadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloadOutcome::Committed {
                extension,
                from_version: Some(from),
                to_version,
                ..
            } => write!(f, "{}: updated {} → {}", extension, from, to_version),
            ReloadOutcome::Committed {
                extension,
                from_version: None,
                to_version,
                ..
            } => write!(f, "{}: installed {}", extension, to_version),
            ReloadOutcome::UpToDate { extension, version } => {
                write!(f, "{}: up to date ({})", extension, version)
            }
            ReloadOutcome::RestartRequired {
                extension,
                from_version,
                to_version,
            } => write!(
                f,
                "{}: {} → {} saved, restart to apply",
                extension, from_version, to_version
            ),
        }
    }
}

/// Drives install, update, uninstall and startup restore.
pub struct ReloadCoordinator {
    store: Arc<RecordStore>,
    connections: Arc<ConnectionManager>,
    hooks: Arc<HookBindingTable>,
    source: Arc<dyn ManifestSource>,
    tracker: Arc<TransactionTracker>,
    status: Arc<StatusPublisher>,
    policy: PartialActivationPolicy,
    hot_reload: bool,
    drain_timeout: Duration,
}

impl ReloadCoordinator {
    pub fn new(
        store: Arc<RecordStore>,
        connections: Arc<ConnectionManager>,
        hooks: Arc<HookBindingTable>,
        source: Arc<dyn ManifestSource>,
        tracker: Arc<TransactionTracker>,
        status: Arc<StatusPublisher>,
    ) -> Self {
        Self {
            store,
            connections,
            hooks,
            source,
            tracker,
            status,
            policy: PartialActivationPolicy::default(),
            hot_reload: true,
            drain_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_policy(mut self, policy: PartialActivationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hot_reload(mut self, hot_reload: bool) -> Self {
        self.hot_reload = hot_reload;
        self
    }

    /// Upper bound on closing a superseded generation.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Install an extension from `source` as generation 1.
    pub async fn install(&self, source: ExtensionSource) -> Result<ReloadOutcome, ExtensionError> {
        let manifest = self.source.fetch(&source).await?;
        manifest
            .validate()
            .map_err(|e| ExtensionError::invalid_manifest(&manifest.name, e))?;

        let txn = self.tracker.begin(&manifest.name)?;
        if self.store.contains(&manifest.name) {
            return Err(ExtensionError::AlreadyInstalled(manifest.name.clone()));
        }

        let record = ExtensionRecord::new(manifest, source, self.store.next_install_seq());
        info!(
            "Installing {} {} from {}",
            record.name, record.installed_version, record.source
        );

        let (report, staged) = self.stage(&txn, &record).await?;
        let warnings = partial_warnings(&report);
        let record = record.with_warnings(warnings.clone());
        let to_version = record.installed_version.clone();
        let generation = record.generation;

        self.swap(&txn, record, staged).await?;
        self.announce_ready(&report);
        self.status
            .notify(txn.name(), format!("installed {}", to_version));

        Ok(ReloadOutcome::Committed {
            extension: txn.name().to_string(),
            from_version: None,
            to_version,
            generation,
            warnings,
            report,
        })
    }

    /// Re-read the extension's source and reload if it changed.
    pub async fn update(&self, name: &str) -> Result<ReloadOutcome, ExtensionError> {
        let txn = self.tracker.begin(name)?;
        let current = self.store.get(name)?;
        let candidate = self.source.fetch(&current.source).await?;
        self.reload_locked(&txn, current, candidate).await
    }

    /// Reload an extension to an explicit candidate manifest.
    pub async fn reload(
        &self,
        name: &str,
        candidate: ExtensionManifest,
    ) -> Result<ReloadOutcome, ExtensionError> {
        let txn = self.tracker.begin(name)?;
        let current = self.store.get(name)?;
        self.reload_locked(&txn, current, candidate).await
    }

    /// Update every installed extension. Extensions are independent; one
    /// failing does not stop the others.
    pub async fn update_all(&self) -> Vec<(String, Result<ReloadOutcome, ExtensionError>)> {
        let names: Vec<String> = self.store.list().into_iter().map(|r| r.name).collect();
        let updates = names.into_iter().map(|name| async move {
            let result = self.update(&name).await;
            (name, result)
        });
        join_all(updates).await
    }

    /// Remove an extension, closing its connections and dropping its hooks.
    pub async fn uninstall(&self, name: &str) -> Result<ExtensionRecord, ExtensionError> {
        let txn = self.tracker.begin(name)?;
        let record = self.store.get(name)?;

        txn.set_phase(ReloadPhase::Swapping);
        self.store.persist_removal(name).await?;

        let old = {
            let _section = self.tracker.publish_section();
            self.store.unpublish(name);
            self.hooks.unbind(name, record.generation);
            self.connections.unpublish(name)
        };
        if let Some(old) = old {
            self.retire(old).await;
        }

        self.status.forget(name);
        txn.set_phase(ReloadPhase::Committed);
        self.status
            .notify(name, format!("uninstalled {}", record.installed_version));
        Ok(record)
    }

    /// Activate every persisted extension at its persisted generation.
    ///
    /// Run once at startup. An extension whose servers all fail stays
    /// installed with status `failed`; a source that no longer matches the
    /// persisted manifest is flagged, never applied.
    pub async fn restore(&self) -> Vec<ActivationReport> {
        let records = self.store.list();
        info!("Restoring {} installed extensions", records.len());

        join_all(records.into_iter().map(|record| self.restore_one(record)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn restore_one(&self, record: ExtensionRecord) -> Option<ActivationReport> {
        let txn = match self.tracker.begin(&record.name) {
            Ok(txn) => txn,
            Err(e) => {
                warn!("Skipping restore of {}: {}", record.name, e);
                return None;
            }
        };

        let name = record.name.clone();
        let generation = record.generation;

        if let Err(e) = self
            .hooks
            .bind(&name, generation, record.install_seq, &record.manifest.hooks)
        {
            warn!("Restored extension {} has invalid hooks: {}", name, e);
            self.store
                .update_runtime(&name, |r| r.status = ExtensionStatus::Failed);
            txn.set_phase(ReloadPhase::RolledBack);
            return None;
        }

        txn.set_phase(ReloadPhase::Connecting);
        let report = self
            .connections
            .activate(&name, generation, &record.manifest.mcp_servers)
            .await;

        let mut warnings = partial_warnings(&report);
        let failed = report.total() > 0 && report.ready_count() == 0;

        match self.source.fetch(&record.source).await {
            Ok(candidate) if candidate != *record.manifest => {
                warn!(
                    "Source of {} now offers {}, installed generation is {}",
                    name, candidate.version, record.installed_version
                );
                warnings.push(ExtensionWarning::SourceDrift {
                    source_version: candidate.version.to_string(),
                });
                self.status.set_candidate(&name, candidate);
            }
            Ok(_) => {}
            Err(e) => debug!("Could not check source of {}: {}", name, e),
        }

        txn.set_phase(ReloadPhase::Swapping);
        {
            let _section = self.tracker.publish_section();
            self.connections.promote(&name, generation);
            self.hooks.promote(&name, generation);
            self.store.update_runtime(&name, |r| {
                r.status = if failed {
                    ExtensionStatus::Failed
                } else {
                    ExtensionStatus::Active
                };
                r.warnings = warnings;
            });
        }
        txn.set_phase(ReloadPhase::Committed);

        if failed {
            self.status.notify(
                &name,
                format!("failed to start: {}", report.failures().join("; ")),
            );
        } else {
            self.announce_ready(&report);
        }
        Some(report)
    }

    async fn reload_locked(
        &self,
        txn: &TransactionGuard,
        current: ExtensionRecord,
        candidate: ExtensionManifest,
    ) -> Result<ReloadOutcome, ExtensionError> {
        txn.set_phase(ReloadPhase::Validating);
        if candidate.name != current.name {
            return Err(ExtensionError::invalid_manifest(
                &current.name,
                ManifestError::NameMismatch {
                    expected: current.name.clone(),
                    found: candidate.name.clone(),
                },
            ));
        }
        candidate
            .validate()
            .map_err(|e| ExtensionError::invalid_manifest(&current.name, e))?;

        if !update_pending(&current.manifest, &candidate) {
            debug!("{} is up to date at {}", current.name, current.installed_version);
            return Ok(ReloadOutcome::UpToDate {
                extension: current.name,
                version: current.installed_version,
            });
        }

        let from_version = current.installed_version.clone();
        let next = current.next_generation(candidate);
        let to_version = next.installed_version.clone();

        if !self.hot_reload {
            self.store.persist(&next).await?;
            self.status.notify(
                &current.name,
                format!(
                    "update {} → {} saved, restart to apply",
                    from_version, to_version
                ),
            );
            return Ok(ReloadOutcome::RestartRequired {
                extension: current.name,
                from_version,
                to_version,
            });
        }

        info!(
            "Reloading {} {} → {} (generation {})",
            next.name, from_version, to_version, next.generation
        );

        let (report, staged) = match self.stage(txn, &next).await {
            Ok(staged) => staged,
            Err(e) => {
                self.status.notify(
                    &current.name,
                    format!("update to {} rolled back, {} still active: {}", to_version, from_version, e),
                );
                return Err(e);
            }
        };
        let warnings = partial_warnings(&report);
        let next = next.with_warnings(warnings.clone());
        let generation = next.generation;

        self.swap(txn, next, staged).await?;
        self.status.forget(&current.name);
        self.announce_ready(&report);
        self.status.notify(
            &current.name,
            format!("successfully updated: {} → {}", from_version, to_version),
        );

        Ok(ReloadOutcome::Committed {
            extension: current.name,
            from_version: Some(from_version),
            to_version,
            generation,
            warnings,
            report,
        })
    }

    /// Bind hooks and connect servers for `record`'s generation without
    /// publishing anything. Rolls back on failure.
    async fn stage(
        &self,
        txn: &TransactionGuard,
        record: &ExtensionRecord,
    ) -> Result<(ActivationReport, StagedGeneration<'_>), ExtensionError> {
        let name = record.name.as_str();
        let generation = record.generation;
        let staged = StagedGeneration {
            connections: &self.connections,
            hooks: &self.hooks,
            name: name.to_string(),
            generation,
            published: false,
        };

        if let Err(e) = self
            .hooks
            .bind(name, generation, record.install_seq, &record.manifest.hooks)
        {
            txn.set_phase(ReloadPhase::RolledBack);
            return Err(e);
        }

        txn.set_phase(ReloadPhase::Connecting);
        let report = self
            .connections
            .activate(name, generation, &record.manifest.mcp_servers)
            .await;

        if !self.policy.accepts(report.ready_count(), report.total()) {
            warn!(
                "{} generation {}: {}/{} servers ready, rolling back",
                name,
                generation,
                report.ready_count(),
                report.total()
            );
            self.rollback(txn, name, generation).await;
            return Err(ExtensionError::ActivationFailed {
                extension: name.to_string(),
                failures: report.failures(),
            });
        }

        Ok((report, staged))
    }

    /// Persist `record` and publish its staged generation.
    async fn swap(
        &self,
        txn: &TransactionGuard,
        record: ExtensionRecord,
        mut staged: StagedGeneration<'_>,
    ) -> Result<(), ExtensionError> {
        txn.set_phase(ReloadPhase::Swapping);
        let name = record.name.clone();
        let generation = record.generation;

        if let Err(e) = self.store.persist(&record).await {
            warn!("Failed to persist {} generation {}: {}", name, generation, e);
            self.rollback(txn, &name, generation).await;
            return Err(e.into());
        }

        let old = {
            let _section = self.tracker.publish_section();
            let old = self.connections.promote(&name, generation);
            self.hooks.promote(&name, generation);
            self.store.commit(record);
            old
        };
        staged.published = true;
        txn.set_phase(ReloadPhase::Committed);
        info!("{} generation {} committed", name, generation);

        if let Some(old) = old {
            self.retire(old).await;
        }
        Ok(())
    }

    /// Close a superseded generation. In-flight calls get `drain_timeout`
    /// to finish; past that the set is abandoned so the transaction can end.
    async fn retire(&self, old: Arc<ConnectionSet>) {
        debug!("Closing {} generation {}", old.extension(), old.generation());
        if timeout(self.drain_timeout, old.close_all()).await.is_err() {
            warn!(
                "{} generation {} did not close within {:?}, abandoning it",
                old.extension(),
                old.generation(),
                self.drain_timeout
            );
        }
    }

    async fn rollback(&self, txn: &TransactionGuard, name: &str, generation: u64) {
        self.hooks.unbind(name, generation);
        self.connections.deactivate(name, generation).await;
        txn.set_phase(ReloadPhase::RolledBack);
    }

    fn announce_ready(&self, report: &ActivationReport) {
        for server in &report.servers {
            if let ServerStatus::Ready { tools } = server.status {
                self.status.notify(
                    &report.extension,
                    format!("{} tools ready from server {}", tools, server.server),
                );
            }
        }
    }
}

/// Staged hooks and connections of a generation that has not been
/// published. Dropped unpublished (the transaction failed or its future was
/// cancelled), it discards them.
struct StagedGeneration<'a> {
    connections: &'a ConnectionManager,
    hooks: &'a HookBindingTable,
    name: String,
    generation: u64,
    published: bool,
}

impl Drop for StagedGeneration<'_> {
    fn drop(&mut self) {
        if self.published {
            return;
        }

        self.hooks.unbind(&self.name, self.generation);
        let Some(set) = self.connections.discard_staged(&self.name, self.generation) else {
            return;
        };
        debug!(
            "Discarding staged {} generation {}",
            self.name, self.generation
        );
        // Stdio servers are killed when their transport drops; the close
        // also ends remote sessions when a runtime is still around.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { set.close_all().await });
        }
    }
}

fn partial_warnings(report: &ActivationReport) -> Vec<ExtensionWarning> {
    let failed = report.failed_servers();
    if failed.is_empty() {
        Vec::new()
    } else {
        vec![ExtensionWarning::PartialActivation { failed }]
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
