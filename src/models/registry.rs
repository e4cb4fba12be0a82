//! Versioned model registry and artifact staging.
//!
//! The registry is a directory tree laid out as
//! `<root>/<display_name>/v<N>/{scalers.json, model.onnx}`; the latest
//! version is the highest `N`. Artifacts are copied into a local staging
//! directory from which the loader reads them.

use crate::error::LoadError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the marker file recording which registry version is staged.
pub const VERSION_FILE: &str = "VERSION";

/// One registered model version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVersion {
    pub display_name: String,
    pub version: u64,
    /// Location holding the version's artifacts
    pub artifact_uri: PathBuf,
}

/// Lookup and download of registered model versions.
pub trait ModelRegistry: Send + Sync {
    /// Most recent version registered under `display_name`, if any.
    fn latest(&self, display_name: &str) -> Result<Option<ModelVersion>, LoadError>;

    /// Copy one named artifact of `version` to `destination`, replacing it.
    fn download(
        &self,
        version: &ModelVersion,
        artifact: &str,
        destination: &Path,
    ) -> Result<(), LoadError>;
}

/// Registry backed by a local or mounted directory.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ModelRegistry for DirectoryRegistry {
    fn latest(&self, display_name: &str) -> Result<Option<ModelVersion>, LoadError> {
        if !self.root.is_dir() {
            return Err(LoadError::Registry(format!(
                "registry root {} is not reachable",
                self.root.display()
            )));
        }

        let model_dir = self.root.join(display_name);
        if !model_dir.is_dir() {
            return Ok(None);
        }

        let entries = fs::read_dir(&model_dir).map_err(|source| LoadError::Io {
            path: model_dir.clone(),
            source,
        })?;

        let latest = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name();
                let version = name.to_str()?.strip_prefix('v')?.parse::<u64>().ok()?;
                Some((version, entry.path()))
            })
            .max_by_key(|(version, _)| *version);

        Ok(latest.map(|(version, artifact_uri)| ModelVersion {
            display_name: display_name.to_string(),
            version,
            artifact_uri,
        }))
    }

    fn download(
        &self,
        version: &ModelVersion,
        artifact: &str,
        destination: &Path,
    ) -> Result<(), LoadError> {
        let source = version.artifact_uri.join(artifact);
        if !source.is_file() {
            return Err(LoadError::Missing(source));
        }

        info!(source = %source.display(), destination = %destination.display(), "Downloading artifact");

        // copy next to the destination, then rename over it
        let partial = destination.with_extension("partial");
        fs::copy(&source, &partial).map_err(|source| LoadError::Io {
            path: partial.clone(),
            source,
        })?;
        fs::rename(&partial, destination).map_err(|source| LoadError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

/// Local paths the loader reads artifacts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArea {
    pub dir: PathBuf,
    pub scaler_file: String,
    pub model_file: String,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, scaler_file: &str, model_file: &str) -> Self {
        Self {
            dir: dir.into(),
            scaler_file: scaler_file.to_string(),
            model_file: model_file.to_string(),
        }
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.dir.join(&self.scaler_file)
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(&self.model_file)
    }

    pub fn version_path(&self) -> PathBuf {
        self.dir.join(VERSION_FILE)
    }

    /// Version recorded by the last fetch, 0 when unknown.
    pub fn staged_version(&self) -> u64 {
        fs::read_to_string(self.version_path())
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Download the latest registered version into `staging`.
///
/// Returns `Ok(None)` without touching the staging area when nothing is
/// registered under `display_name`.
pub fn fetch_latest(
    registry: &dyn ModelRegistry,
    display_name: &str,
    staging: &StagingArea,
) -> Result<Option<ModelVersion>, LoadError> {
    let Some(latest) = registry.latest(display_name)? else {
        info!(display_name = %display_name, "No registered model found");
        return Ok(None);
    };

    info!(
        display_name = %display_name,
        version = latest.version,
        uri = %latest.artifact_uri.display(),
        "Found latest model version"
    );

    fs::create_dir_all(&staging.dir).map_err(|source| LoadError::Io {
        path: staging.dir.clone(),
        source,
    })?;

    registry.download(&latest, &staging.scaler_file, &staging.scaler_path())?;
    registry.download(&latest, &staging.model_file, &staging.model_path())?;

    let version_path = staging.version_path();
    fs::write(&version_path, latest.version.to_string()).map_err(|source| LoadError::Io {
        path: version_path,
        source,
    })?;

    info!(version = latest.version, "Scalers and model staged");
    Ok(Some(latest))
}
