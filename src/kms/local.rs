//! In-process key wrapping with a local master key.
//!
//! For development and tests. The wrapped form is
//! `base64([IV][AES-256-OFB(master, dek)])`, produced by the same cipher that
//! protects content.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use zeroize::Zeroize;

use crate::crypto::{decrypt_bytes, encrypt_bytes, DataKey, WrappedKey};
use crate::kms::types::{KeyServiceError, KeyWrapService};

/// Key-wrapping service that never leaves the process.
pub struct LocalKeyWrapper {
    master: DataKey,
}

impl LocalKeyWrapper {
    pub fn new(master: DataKey) -> Self {
        Self { master }
    }

    /// Build from a base64-encoded 32-byte master key.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyServiceError> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| {
                KeyServiceError::Misconfigured(format!("master key is not base64: {}", e))
            })?;
        let master = DataKey::from_slice(&bytes);
        bytes.zeroize();
        Ok(Self::new(master?))
    }
}

#[async_trait]
impl KeyWrapService for LocalKeyWrapper {
    async fn wrap_key(&self, key: &DataKey) -> Result<WrappedKey, KeyServiceError> {
        let sealed = encrypt_bytes(&self.master, key.as_bytes())?;
        Ok(WrappedKey::new(STANDARD.encode(sealed)))
    }

    async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<DataKey, KeyServiceError> {
        let sealed = STANDARD
            .decode(wrapped.as_str())
            .map_err(|e| KeyServiceError::Malformed(format!("wrapped key is not base64: {}", e)))?;
        let mut bytes = decrypt_bytes(&self.master, &sealed)?;
        let key = DataKey::from_slice(&bytes);
        bytes.zeroize();
        Ok(key?)
    }
}

impl std::fmt::Debug for LocalKeyWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyWrapper").finish_non_exhaustive()
    }
}
