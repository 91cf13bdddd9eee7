//! In-memory key store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::crypto::WrappedKey;
use crate::keystore::types::{KeyStore, PrincipalKeyRecord, StoreError};

/// Key store held in a concurrent map. Contents are lost on exit.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    inner: Arc<DashMap<String, WrappedKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of principals with a record.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// All records, in no particular order.
    pub fn records(&self) -> Vec<PrincipalKeyRecord> {
        self.inner
            .iter()
            .map(|r| PrincipalKeyRecord {
                principal: r.key().clone(),
                wrapped_key: r.value().clone(),
            })
            .collect()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_wrapped_key(&self, principal: &str) -> Result<Option<WrappedKey>, StoreError> {
        Ok(self.inner.get(principal).map(|r| r.value().clone()))
    }

    async fn put_wrapped_key_if_absent(
        &self,
        principal: &str,
        wrapped: &WrappedKey,
    ) -> Result<bool, StoreError> {
        match self.inner.entry(principal.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(wrapped.clone());
                Ok(true)
            }
        }
    }
}
