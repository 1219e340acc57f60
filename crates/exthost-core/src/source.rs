//! Manifest loading from extension sources.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use exthost_protocols::{
    ExtensionError, ExtensionManifest, ExtensionSource, HooksDocument, ManifestDocument,
    ManifestError, HOOKS_DIR_NAME, HOOKS_FILE_NAME, MANIFEST_FILE_NAME,
};

/// Reads the manifest currently published at an extension's source.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, source: &ExtensionSource) -> Result<ExtensionManifest, ExtensionError>;
}

/// Local directories and HTTP URLs.
pub struct DefaultManifestSource {
    http: reqwest::Client,
}

impl DefaultManifestSource {
    pub fn new() -> Result<Self, ExtensionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ExtensionError::Source(e.to_string()))?;
        Ok(Self { http })
    }

    async fn fetch_remote(&self, url: &str) -> Result<ExtensionManifest, ExtensionError> {
        debug!("Fetching remote manifest from {}", url);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ExtensionError::Source(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ExtensionError::Source(format!(
                "{}: HTTP {}",
                url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExtensionError::Source(format!("{}: {}", url, e)))?;

        parse_manifest(&body, None, url)
    }
}

#[async_trait]
impl ManifestSource for DefaultManifestSource {
    async fn fetch(&self, source: &ExtensionSource) -> Result<ExtensionManifest, ExtensionError> {
        match source {
            ExtensionSource::Local { path } => load_local_manifest(path).await,
            ExtensionSource::Remote { url } => self.fetch_remote(url).await,
        }
    }
}

/// Interpret a user-supplied install source.
///
/// Local paths are made absolute: the source is stored with the record and
/// later resolved from whatever directory the host runs in.
pub async fn resolve_source(source: &str) -> Result<ExtensionSource, ExtensionError> {
    match ExtensionSource::parse(source) {
        ExtensionSource::Local { path } => {
            let path = fs::canonicalize(&path)
                .await
                .map_err(|e| ExtensionError::Source(format!("{}: {}", path.display(), e)))?;
            Ok(ExtensionSource::Local { path })
        }
        remote => Ok(remote),
    }
}

/// Load `extension.json` (and a sibling `hooks/hooks.json`) from a directory.
///
/// `path` may also point at the manifest file itself.
pub async fn load_local_manifest(path: &Path) -> Result<ExtensionManifest, ExtensionError> {
    let (dir, manifest_path) = manifest_location(path).await;
    let label = dir.display().to_string();

    let content = fs::read_to_string(&manifest_path).await.map_err(|e| {
        ExtensionError::Source(
            ManifestError::Io {
                path: manifest_path.clone(),
                source: e,
            }
            .to_string(),
        )
    })?;

    let hooks_path = dir.join(HOOKS_DIR_NAME).join(HOOKS_FILE_NAME);
    let hooks = match fs::read_to_string(&hooks_path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(ExtensionError::Source(
                ManifestError::Io {
                    path: hooks_path,
                    source: e,
                }
                .to_string(),
            ));
        }
    };

    parse_manifest(&content, hooks.as_deref(), &label)
}

async fn manifest_location(path: &Path) -> (PathBuf, PathBuf) {
    let is_file = fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false);
    if is_file {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        (dir, path.to_path_buf())
    } else {
        (path.to_path_buf(), path.join(MANIFEST_FILE_NAME))
    }
}

/// Parse a manifest document, attributing failures to the declared name
/// when it can be read.
fn parse_manifest(
    content: &str,
    hooks: Option<&str>,
    label: &str,
) -> Result<ExtensionManifest, ExtensionError> {
    let doc = ManifestDocument::parse(content)
        .map_err(|e| ExtensionError::invalid_manifest(label, e))?;
    let name = doc.name.clone();

    let hooks = hooks
        .map(HooksDocument::parse)
        .transpose()
        .map_err(|e| ExtensionError::invalid_manifest(&name, e))?;

    doc.into_manifest(hooks)
        .map_err(|e| ExtensionError::invalid_manifest(&name, e))
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
