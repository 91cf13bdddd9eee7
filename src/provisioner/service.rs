//! Get-or-create of per-principal data keys.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::ConfigSnapshot;
use crate::crypto::{DataKey, EnvelopeCipher, WrappedKey};
use crate::keystore::{KeyStore, StoreError};
use crate::kms::{KeyServiceError, KeyWrapService};
use crate::observability::metrics;
use crate::provisioner::cache::{KeyCache, DEFAULT_CACHE_CAPACITY};
use crate::resilience::{with_timeout, TimeoutError, DEFAULT_CALL_TIMEOUT};

/// Settings key overriding the cache capacity.
pub const CACHE_CAPACITY_SETTING: &str = "provisioner.cache_capacity";

#[derive(Debug, Clone, Copy)]
pub struct ProvisionerOptions {
    /// Maximum number of unwrapped keys held in memory.
    pub cache_capacity: usize,
    /// Upper bound on each key store and key service call.
    pub call_timeout: Duration,
}

impl Default for ProvisionerOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ProvisionerOptions {
    /// Defaults with the cache capacity taken from settings when present.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let mut options = Self::default();
        let raw = snapshot.get(CACHE_CAPACITY_SETTING);
        if raw.is_empty() {
            return options;
        }
        match raw.parse::<usize>() {
            Ok(capacity) if capacity > 0 => options.cache_capacity = capacity,
            _ => tracing::warn!(
                setting = CACHE_CAPACITY_SETTING,
                value = %raw,
                default = DEFAULT_CACHE_CAPACITY,
                "Invalid cache capacity, using default"
            ),
        }
        options
    }
}

/// Errors that can occur resolving a principal's data key.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    KeyService(#[from] KeyServiceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: &'static str, after: Duration },

    /// The insert lost a race but no record was found on read-back.
    #[error("key record for principal '{0}' missing after insert conflict")]
    Conflict(String),

    #[error("principal identifier must not be empty")]
    EmptyPrincipal,
}

impl ProvisionError {
    /// Whether calling `get_or_create` again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisionError::KeyService(e) => e.is_retryable(),
            ProvisionError::Store(StoreError::Serialization(_)) => false,
            ProvisionError::Store(_) => true,
            ProvisionError::Timeout { .. } | ProvisionError::Conflict(_) => true,
            ProvisionError::EmptyPrincipal => false,
        }
    }
}

impl From<TimeoutError> for ProvisionError {
    fn from(e: TimeoutError) -> Self {
        ProvisionError::Timeout {
            operation: e.operation,
            after: e.after,
        }
    }
}

/// Resolves principals to data keys, creating and persisting keys on first use.
///
/// Lookups for one principal are serialized: concurrent first requests share
/// a single provisioning attempt, so at most one key is ever generated per
/// principal by this process. Across processes the store's insert-if-absent
/// decides the winner and losers adopt the stored record.
pub struct KeyProvisioner<W, S> {
    wrapper: W,
    store: S,
    cache: KeyCache,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    call_timeout: Duration,
}

impl<W, S> KeyProvisioner<W, S>
where
    W: KeyWrapService,
    S: KeyStore,
{
    pub fn new(wrapper: W, store: S, options: ProvisionerOptions) -> Self {
        Self {
            wrapper,
            store,
            cache: KeyCache::new(options.cache_capacity),
            inflight: DashMap::new(),
            call_timeout: options.call_timeout,
        }
    }

    /// The data key for `principal`, creating one if none exists yet.
    pub async fn get_or_create(&self, principal: &str) -> Result<DataKey, ProvisionError> {
        if principal.is_empty() {
            return Err(ProvisionError::EmptyPrincipal);
        }

        if let Some(key) = self.cache.get(principal) {
            metrics::record_cache_lookup(true);
            return Ok(key);
        }
        metrics::record_cache_lookup(false);

        let slot = InflightSlot::join(&self.inflight, principal);
        let _turn = slot.gate.lock().await;
        match self.cache.get(principal) {
            Some(key) => {
                tracing::debug!(principal = %principal, "Joined in-flight key provisioning");
                Ok(key)
            }
            None => self.provision(principal).await,
        }
    }

    async fn provision(&self, principal: &str) -> Result<DataKey, ProvisionError> {
        let existing = with_timeout(
            "key store read",
            self.call_timeout,
            self.store.get_wrapped_key(principal),
        )
        .await??;

        let (key, source) = match existing {
            Some(wrapped) => (self.unwrap_stored(principal, &wrapped).await?, "unwrapped"),
            None => self.create(principal).await?,
        };

        if let Some(evicted) = self.cache.insert(principal, key.clone()) {
            tracing::debug!(principal = %evicted, "Evicted data key from cache");
        }
        metrics::record_key_provisioned(source);

        Ok(key)
    }

    async fn create(&self, principal: &str) -> Result<(DataKey, &'static str), ProvisionError> {
        let key = EnvelopeCipher::new_key();
        let wrapped =
            with_timeout("key wrap", self.call_timeout, self.wrapper.wrap_key(&key)).await??;

        let created = with_timeout(
            "key store write",
            self.call_timeout,
            self.store.put_wrapped_key_if_absent(principal, &wrapped),
        )
        .await??;

        if created {
            tracing::info!(principal = %principal, "Created data key");
            return Ok((key, "created"));
        }

        // Another writer recorded a key first; theirs is authoritative.
        tracing::warn!(
            principal = %principal,
            "Data key already recorded by another writer, adopting it"
        );
        let stored = with_timeout(
            "key store read",
            self.call_timeout,
            self.store.get_wrapped_key(principal),
        )
        .await??
        .ok_or_else(|| ProvisionError::Conflict(principal.to_string()))?;

        Ok((self.unwrap_stored(principal, &stored).await?, "unwrapped"))
    }

    async fn unwrap_stored(
        &self,
        principal: &str,
        wrapped: &WrappedKey,
    ) -> Result<DataKey, ProvisionError> {
        let key = with_timeout("key unwrap", self.call_timeout, self.wrapper.unwrap_key(wrapped))
            .await?
            .map_err(|e| {
                tracing::warn!(principal = %principal, error = %e, "Failed to unwrap data key");
                e
            })?;
        tracing::debug!(principal = %principal, "Unwrapped stored data key");
        Ok(key)
    }

    /// Drop a principal's key from the cache. The persisted record is kept.
    pub fn evict(&self, principal: &str) -> bool {
        self.cache.remove(principal)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Principals with a cached key, most recently used first.
    pub fn cached_principals(&self) -> Vec<String> {
        self.cache.principals()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn wrapper(&self) -> &W {
        &self.wrapper
    }
}

/// One caller's claim on a principal's provisioning gate.
///
/// Dropping it, on return or on cancellation, removes the map entry when the
/// map and this slot hold the only references. The count is checked under
/// the map's shard lock, which `join` also takes, so no new waiter can slip in.
struct InflightSlot<'a> {
    inflight: &'a DashMap<String, Arc<Mutex<()>>>,
    principal: &'a str,
    gate: Arc<Mutex<()>>,
}

impl<'a> InflightSlot<'a> {
    fn join(inflight: &'a DashMap<String, Arc<Mutex<()>>>, principal: &'a str) -> Self {
        let gate = inflight.entry(principal.to_string()).or_default().clone();
        Self {
            inflight,
            principal,
            gate,
        }
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        self.inflight
            .remove_if(self.principal, |_, gate| Arc::strong_count(gate) == 2);
    }
}

impl<W, S> std::fmt::Debug for KeyProvisioner<W, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyProvisioner")
            .field("cache", &self.cache)
            .field("inflight", &self.inflight.len())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
