//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize subsystems in dependency order
//! - Start the configuration watcher
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Secrets come from the environment, never from the watched file

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ConfigError, ConfigStore, ConfigWatch, RequireKeys, WatchOptions};
use crate::keystore::{FileKeyStore, KeyStore, MemoryKeyStore, StoreError};
use crate::kms::{CloudKmsClient, KeyServiceError, KeyWrapService, KmsKeyPath, LocalKeyWrapper};
use crate::provisioner::{KeyProvisioner, ProvisionerOptions};
use crate::resilience::DEFAULT_CALL_TIMEOUT;

/// Settings key naming the key store file. In-memory store when absent.
pub const KEYSTORE_PATH_SETTING: &str = "keystore.path";

pub type SharedKeyWrapper = Arc<dyn KeyWrapService>;
pub type SharedKeyStore = Arc<dyn KeyStore>;
pub type SharedProvisioner = Arc<KeyProvisioner<SharedKeyWrapper, SharedKeyStore>>;

/// Where data keys get wrapped.
#[derive(Debug, Clone)]
pub enum KeyWrapperSource {
    /// Cloud KMS addressed by the `project` and `encryption.*` settings.
    CloudKms,
    /// In-process wrapping with a base64 master key read from this variable.
    LocalMasterKeyEnv(String),
}

#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub config_path: PathBuf,
    /// `None` loads the file once and never reloads it.
    pub watch: Option<WatchOptions>,
    pub key_wrapper: KeyWrapperSource,
    pub call_timeout: Duration,
}

impl StartupOptions {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            watch: Some(WatchOptions::default()),
            key_wrapper: KeyWrapperSource::CloudKms,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("key service setup failed: {0}")]
    KeyService(#[from] KeyServiceError),

    #[error("key store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("environment variable {0} not set")]
    MissingSecret(String),
}

/// Everything the process needs, built in dependency order.
pub struct Services {
    pub config: Arc<ConfigStore>,
    pub provisioner: SharedProvisioner,
    watch: Option<ConfigWatch>,
}

impl Services {
    /// Bootstrap: config → validators → watcher → key wrapping → key store → provisioner.
    pub async fn start(options: StartupOptions) -> Result<Self, StartupError> {
        let config = ConfigStore::load(&options.config_path)?;

        if matches!(options.key_wrapper, KeyWrapperSource::CloudKms) {
            let required = RequireKeys::new(KmsKeyPath::required_settings());
            required.check(&config.snapshot()).map_err(ConfigError::from)?;
            config.add_validator(required);
        }

        let watch = match options.watch {
            Some(watch_options) => Some(config.watch_with(watch_options)?),
            None => None,
        };

        let wrapper = build_key_wrapper(&config, &options)?;

        let snapshot = config.snapshot();
        let store = open_key_store(&snapshot.get(KEYSTORE_PATH_SETTING))?;

        let provisioner_options = ProvisionerOptions {
            call_timeout: options.call_timeout,
            ..ProvisionerOptions::from_snapshot(&snapshot)
        };
        let provisioner = Arc::new(KeyProvisioner::new(wrapper, store, provisioner_options));

        tracing::info!(
            config = %options.config_path.display(),
            generation = snapshot.generation(),
            cache_capacity = provisioner_options.cache_capacity,
            watching = watch.is_some(),
            "Services started"
        );

        Ok(Self {
            config,
            provisioner,
            watch,
        })
    }

    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(ConfigWatch::is_running)
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(self) {
        if let Some(watch) = self.watch {
            watch.stop().await;
        }
        tracing::info!("Services stopped");
    }
}

fn build_key_wrapper(
    config: &Arc<ConfigStore>,
    options: &StartupOptions,
) -> Result<SharedKeyWrapper, StartupError> {
    match &options.key_wrapper {
        KeyWrapperSource::CloudKms => {
            let client: SharedKeyWrapper =
                Arc::new(CloudKmsClient::from_env(Arc::clone(config), options.call_timeout)?);
            Ok(client)
        }
        KeyWrapperSource::LocalMasterKeyEnv(var) => {
            let encoded = std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| StartupError::MissingSecret(var.clone()))?;
            tracing::warn!(
                env = %var,
                "Using local master key; data keys never leave this process"
            );
            let local: SharedKeyWrapper = Arc::new(LocalKeyWrapper::from_base64(&encoded)?);
            Ok(local)
        }
    }
}

fn open_key_store(path: &str) -> Result<SharedKeyStore, StartupError> {
    if path.is_empty() {
        tracing::warn!("No key store path configured, wrapped keys will not survive a restart");
        return Ok(Arc::new(MemoryKeyStore::new()));
    }
    let store = FileKeyStore::open(Path::new(path))?;
    tracing::info!(path = %path, records = store.len(), "Key store opened");
    let store: SharedKeyStore = Arc::new(store);
    Ok(store)
}
