//! Installed extension records.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExtensionWarning;
use crate::manifest::ExtensionManifest;

/// Where an extension was installed from. Immutable after install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExtensionSource {
    /// Directory containing `extension.json`.
    Local { path: PathBuf },
    /// URL serving the manifest document.
    Remote { url: String },
}

impl ExtensionSource {
    /// Interpret a user-supplied source string.
    pub fn parse(source: &str) -> Self {
        let trimmed = source.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            ExtensionSource::Remote {
                url: trimmed.to_string(),
            }
        } else {
            ExtensionSource::Local {
                path: PathBuf::from(trimmed),
            }
        }
    }
}

impl std::fmt::Display for ExtensionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtensionSource::Local { path } => write!(f, "{}", path.display()),
            ExtensionSource::Remote { url } => write!(f, "{}", url),
        }
    }
}

/// Runtime status of an installed extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionStatus {
    #[default]
    Active,
    Reloading,
    Failed,
}

impl std::fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExtensionStatus::Active => "active",
            ExtensionStatus::Reloading => "reloading",
            ExtensionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Phase of a reload transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPhase {
    Validating,
    Connecting,
    Swapping,
    Committed,
    RolledBack,
}

impl std::fmt::Display for ReloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReloadPhase::Validating => "validating",
            ReloadPhase::Connecting => "connecting",
            ReloadPhase::Swapping => "swapping",
            ReloadPhase::Committed => "committed",
            ReloadPhase::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

/// Durable record of one installed extension.
///
/// The manifest of a published generation is shared behind an `Arc` and
/// never mutated; a reload builds a new record with [`next_generation`].
///
/// [`next_generation`]: ExtensionRecord::next_generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionRecord {
    pub name: String,
    pub installed_version: String,
    pub source: ExtensionSource,
    pub manifest: Arc<ExtensionManifest>,
    pub generation: u64,
    /// Install order across extensions; orders hook lookups.
    pub install_seq: u64,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub update_available: bool,
    #[serde(skip)]
    pub status: ExtensionStatus,
    #[serde(skip)]
    pub warnings: Vec<ExtensionWarning>,
}

impl ExtensionRecord {
    /// First generation of a freshly installed extension.
    pub fn new(manifest: ExtensionManifest, source: ExtensionSource, install_seq: u64) -> Self {
        let now = Utc::now();
        Self {
            name: manifest.name.clone(),
            installed_version: manifest.version.to_string(),
            source,
            manifest: Arc::new(manifest),
            generation: 1,
            install_seq,
            installed_at: now,
            updated_at: now,
            update_available: false,
            status: ExtensionStatus::Active,
            warnings: Vec::new(),
        }
    }

    /// Record for the generation following this one.
    pub fn next_generation(&self, manifest: ExtensionManifest) -> Self {
        Self {
            name: self.name.clone(),
            installed_version: manifest.version.to_string(),
            source: self.source.clone(),
            manifest: Arc::new(manifest),
            generation: self.generation + 1,
            install_seq: self.install_seq,
            installed_at: self.installed_at,
            updated_at: Utc::now(),
            update_available: false,
            status: ExtensionStatus::Active,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<ExtensionWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Parsed installed version.
    pub fn version(&self) -> &semver::Version {
        &self.manifest.version
    }
}
