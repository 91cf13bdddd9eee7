//! Live configuration handle.

use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::config::loader::{load_snapshot, read_snapshot, ConfigError};
use crate::config::schema::ConfigSnapshot;
use crate::config::validation::{run_validators, ConfigValidator};
use crate::config::watcher::{ConfigWatch, WatchOptions};
use crate::observability::metrics;

/// Owned handle to the current settings snapshot.
///
/// Readers go through [`ConfigStore::get`] / [`ConfigStore::snapshot`] and
/// never block: the current snapshot lives in an `ArcSwap` and a reload
/// replaces it with a single atomic store. Reloads themselves are serialized,
/// so at most one writer is ever active.
pub struct ConfigStore {
    path: PathBuf,
    current: ArcSwap<ConfigSnapshot>,
    validators: RwLock<Vec<Arc<dyn ConfigValidator>>>,
    writer: Mutex<()>,
}

impl ConfigStore {
    /// Read the initial snapshot. Any failure here should abort startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Arc<Self>, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = load_snapshot(&path)?.with_generation(1);

        tracing::info!(path = %path.display(), "Configuration loaded");

        Ok(Arc::new(Self {
            path,
            current: ArcSwap::from_pointee(snapshot),
            validators: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
        }))
    }

    /// File backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First value at a dotted path, `""` when absent.
    pub fn get(&self, path: &str) -> String {
        self.current.load().get(path)
    }

    /// All values at a dotted path, empty when absent.
    pub fn get_all(&self, path: &str) -> Vec<String> {
        self.current.load().get_all(path)
    }

    /// The current snapshot. Use this when several keys must be read from
    /// the same generation.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation()
    }

    /// Append a validator. Takes effect from the next reload onward.
    pub fn add_validator<V>(&self, validator: V)
    where
        V: ConfigValidator + 'static,
    {
        let mut validators = match self.validators.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        validators.push(Arc::new(validator));
    }

    /// Number of registered validators.
    pub fn validator_count(&self) -> usize {
        match self.validators.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Re-read the backing file and publish it if every validator accepts it.
    ///
    /// On any failure the current snapshot stays in place. Returns the
    /// generation of the newly published snapshot.
    pub async fn reload(&self) -> Result<u64, ConfigError> {
        let _writer = self.writer.lock().await;

        match self.try_reload().await {
            Ok(generation) => {
                tracing::info!(path = %self.path.display(), generation, "Configuration reloaded");
                metrics::record_config_reload("applied");
                Ok(generation)
            }
            Err(ConfigError::Validation(e)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Configuration rejected by validator, keeping current configuration"
                );
                metrics::record_config_reload("rejected");
                Err(ConfigError::Validation(e))
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to reload configuration, keeping current configuration"
                );
                metrics::record_config_reload("failed");
                Err(e)
            }
        }
    }

    async fn try_reload(&self) -> Result<u64, ConfigError> {
        let mut candidate = read_snapshot(&self.path).await?;
        let current = self.current.load_full();

        let validators = match self.validators.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        run_validators(&validators, &current, &mut candidate)?;

        let generation = current.generation() + 1;
        self.current.store(Arc::new(candidate.with_generation(generation)));
        Ok(generation)
    }

    /// Start watching the backing file with default options.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch(self: &Arc<Self>) -> Result<ConfigWatch, ConfigError> {
        self.watch_with(WatchOptions::default())
    }

    /// Start watching the backing file.
    pub fn watch_with(self: &Arc<Self>, options: WatchOptions) -> Result<ConfigWatch, ConfigError> {
        ConfigWatch::spawn(Arc::clone(self), options)
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .field("generation", &self.generation())
            .field("validators", &self.validator_count())
            .finish()
    }
}
