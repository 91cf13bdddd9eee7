//! Key-wrapping service contract and error definitions.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigSnapshot;
use crate::crypto::{CipherError, DataKey, WrappedKey};

/// Wraps and unwraps data keys with a higher-trust managed key.
#[async_trait]
pub trait KeyWrapService: Send + Sync {
    /// Encrypt a data key for storage at rest.
    async fn wrap_key(&self, key: &DataKey) -> Result<WrappedKey, KeyServiceError>;

    /// Recover a data key from its wrapped form.
    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<DataKey, KeyServiceError>;
}

#[async_trait]
impl<T> KeyWrapService for Arc<T>
where
    T: KeyWrapService + ?Sized,
{
    async fn wrap_key(&self, key: &DataKey) -> Result<WrappedKey, KeyServiceError> {
        (**self).wrap_key(key).await
    }

    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<DataKey, KeyServiceError> {
        (**self).unwrap_key(wrapped).await
    }
}

/// Errors that can occur talking to the key-wrapping service.
#[derive(Debug, Error)]
pub enum KeyServiceError {
    /// Connection or transport failure.
    #[error("key service request failed: {0}")]
    Request(String),

    /// Non-success status, including permission errors.
    #[error("key service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The request did not complete in time.
    #[error("key service timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Response could not be interpreted.
    #[error("malformed key service response: {0}")]
    Malformed(String),

    /// The unwrapped material is not a usable data key.
    #[error("unwrapped key rejected: {0}")]
    InvalidKey(#[from] CipherError),

    /// Addressing settings are missing or invalid.
    #[error("key service misconfigured: {0}")]
    Misconfigured(String),
}

impl KeyServiceError {
    /// Whether the same call may succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeyServiceError::Request(_)
                | KeyServiceError::Status { .. }
                | KeyServiceError::Timeout(_)
        )
    }
}

/// Resource name of the managed wrapping key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsKeyPath {
    pub project: String,
    pub location: String,
    pub keyring: String,
    pub key: String,
}

impl KmsKeyPath {
    pub const PROJECT: &'static str = "project";
    pub const LOCATION: &'static str = "encryption.location";
    pub const KEYRING: &'static str = "encryption.keyring";
    pub const KEY: &'static str = "encryption.key";

    /// Settings that must be present for the path to resolve.
    pub fn required_settings() -> [&'static str; 4] {
        [Self::PROJECT, Self::LOCATION, Self::KEYRING, Self::KEY]
    }

    /// Build the path from one snapshot so all four parts share a generation.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self, KeyServiceError> {
        let path = Self {
            project: snapshot.get(Self::PROJECT),
            location: snapshot.get(Self::LOCATION),
            keyring: snapshot.get(Self::KEYRING),
            key: snapshot.get(Self::KEY),
        };

        let missing: Vec<&str> = Self::required_settings()
            .into_iter()
            .zip([&path.project, &path.location, &path.keyring, &path.key])
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| name)
            .collect();
        if !missing.is_empty() {
            return Err(KeyServiceError::Misconfigured(format!(
                "missing settings: {}",
                missing.join(", ")
            )));
        }
        Ok(path)
    }
}

impl std::fmt::Display for KmsKeyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            self.project, self.location, self.keyring, self.key
        )
    }
}
