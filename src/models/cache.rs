//! Process-wide model cache.
//!
//! Holds the current [`ModelSnapshot`] behind an atomic reference. Readers
//! never lock; loading is single-flight behind a mutex that is only held
//! while artifacts are being fetched or loaded.

use crate::error::LoadError;
use crate::models::classifier::Classifier;
use crate::models::loader::ArtifactLoader;
use crate::models::registry::{self, ModelRegistry, ModelVersion, StagingArea};
use crate::models::scaler::ScalerBundle;
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Immutable bundle of classifier and scalers from one registry version.
pub struct ModelSnapshot {
    pub version: u64,
    pub scalers: ScalerBundle,
    pub classifier: Box<dyn Classifier>,
}

impl ModelSnapshot {
    pub fn new(version: u64, scalers: ScalerBundle, classifier: Box<dyn Classifier>) -> Self {
        Self {
            version,
            scalers,
            classifier,
        }
    }
}

impl fmt::Debug for ModelSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSnapshot")
            .field("version", &self.version)
            .field("scalers", &self.scalers)
            .field("classifier", &self.classifier.name())
            .finish()
    }
}

/// Lazily loaded, atomically swapped model snapshot.
pub struct ModelCache {
    current: ArcSwapOption<ModelSnapshot>,
    load_lock: Mutex<()>,
    loader: Arc<dyn ArtifactLoader>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ArtifactLoader>) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            load_lock: Mutex::new(()),
            loader,
        }
    }

    /// The snapshot currently in use, if one has been loaded.
    pub fn current(&self) -> Option<Arc<ModelSnapshot>> {
        self.current.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    /// Return the loaded snapshot, loading it first if necessary.
    ///
    /// Concurrent callers on an empty cache trigger a single load; the rest
    /// wait for it and share the result. A failed load leaves the cache
    /// empty so the next caller tries again.
    pub fn ensure_loaded(&self) -> Result<Arc<ModelSnapshot>, LoadError> {
        if let Some(snapshot) = self.current.load_full() {
            return Ok(snapshot);
        }

        let _guard = self.lock();
        if let Some(snapshot) = self.current.load_full() {
            return Ok(snapshot);
        }

        let snapshot = Arc::new(self.loader.load()?);
        info!(version = snapshot.version, "Model snapshot loaded");
        self.current.store(Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// Load a fresh snapshot and swap it in.
    ///
    /// On failure the previous snapshot stays in place.
    pub fn reload(&self) -> Result<Arc<ModelSnapshot>, LoadError> {
        let _guard = self.lock();
        let snapshot = Arc::new(self.loader.load()?);
        let previous = self.current.swap(Some(snapshot.clone()));

        info!(
            previous_version = ?previous.map(|s| s.version),
            version = snapshot.version,
            "Model snapshot swapped"
        );
        Ok(snapshot)
    }

    /// Stage the latest registered artifacts, serialised with loads.
    pub fn fetch_latest(
        &self,
        registry: &dyn ModelRegistry,
        display_name: &str,
        staging: &StagingArea,
    ) -> Result<Option<ModelVersion>, LoadError> {
        let _guard = self.lock();
        registry::fetch_latest(registry, display_name, staging)
    }

    /// Fetch and reload if the registry holds a newer version than the one
    /// currently loaded. Returns the new version when a swap happened.
    pub fn refresh(
        &self,
        registry: &dyn ModelRegistry,
        display_name: &str,
        staging: &StagingArea,
    ) -> Result<Option<u64>, LoadError> {
        let Some(latest) = registry.latest(display_name)? else {
            return Ok(None);
        };
        let loaded = self.current().map(|s| s.version).unwrap_or(0);
        if latest.version <= loaded {
            return Ok(None);
        }

        info!(loaded = loaded, latest = latest.version, "Newer model registered");
        if self.fetch_latest(registry, display_name, staging)?.is_none() {
            warn!(display_name = %display_name, "Model disappeared from registry during refresh");
            return Ok(None);
        }
        let snapshot = self.reload()?;
        Ok(Some(snapshot.version))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.load_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background task swapping in newer registered versions.
pub struct ModelRefresher {
    cache: Arc<ModelCache>,
    registry: Arc<dyn ModelRegistry>,
    display_name: String,
    staging: StagingArea,
    interval: Duration,
}

impl ModelRefresher {
    pub fn new(
        cache: Arc<ModelCache>,
        registry: Arc<dyn ModelRegistry>,
        display_name: impl Into<String>,
        staging: StagingArea,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            registry,
            display_name: display_name.into(),
            staging,
            interval,
        }
    }

    /// Check once; registry and load failures keep the current snapshot.
    pub async fn tick(&self) -> Option<u64> {
        let cache = self.cache.clone();
        let registry = self.registry.clone();
        let display_name = self.display_name.clone();
        let staging = self.staging.clone();

        let refreshed = tokio::task::spawn_blocking(move || {
            cache.refresh(registry.as_ref(), &display_name, &staging)
        })
        .await;

        match refreshed {
            Ok(Ok(Some(version))) => {
                info!(version = version, "Model refreshed");
                Some(version)
            }
            Ok(Ok(None)) => {
                debug!("No newer model registered");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Model refresh failed, keeping current snapshot");
                None
            }
            Err(e) => {
                warn!(error = %e, "Model refresh task failed");
                None
            }
        }
    }

    /// Start the periodic refresh task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(self.interval);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}
