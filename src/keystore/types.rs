//! Key store contract and record types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::crypto::WrappedKey;

/// The persisted mapping of one principal to its wrapped data key.
///
/// At most one record exists per principal and it is never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalKeyRecord {
    pub principal: String,
    pub wrapped_key: WrappedKey,
}

/// Errors that can occur reading or writing key records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for wrapped data keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// The wrapped key recorded for `principal`, if any.
    async fn get_wrapped_key(&self, principal: &str) -> Result<Option<WrappedKey>, StoreError>;

    /// Record `wrapped` for `principal` unless a record already exists.
    ///
    /// Returns `true` if this call created the record. An existing record is
    /// left untouched.
    async fn put_wrapped_key_if_absent(
        &self,
        principal: &str,
        wrapped: &WrappedKey,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
impl<T> KeyStore for Arc<T>
where
    T: KeyStore + ?Sized,
{
    async fn get_wrapped_key(&self, principal: &str) -> Result<Option<WrappedKey>, StoreError> {
        (**self).get_wrapped_key(principal).await
    }

    async fn put_wrapped_key_if_absent(
        &self,
        principal: &str,
        wrapped: &WrappedKey,
    ) -> Result<bool, StoreError> {
        (**self).put_wrapped_key_if_absent(principal, wrapped).await
    }
}
