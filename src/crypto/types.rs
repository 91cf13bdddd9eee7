//! Key material and cipher error definitions.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a data encryption key in bytes (AES-256).
pub const DATA_KEY_LEN: usize = 32;

/// A 256-bit data encryption key.
///
/// Lives only in memory; the bytes are wiped when the value is dropped and
/// never appear in `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; DATA_KEY_LEN]);

impl DataKey {
    pub fn from_bytes(bytes: [u8; DATA_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let array: [u8; DATA_KEY_LEN] = bytes.try_into().map_err(|_| CipherError::InvalidKeyLength {
            expected: DATA_KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; DATA_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey(<redacted>)")
    }
}

/// A data key as returned by the key-wrapping service. Opaque and safe to persist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WrappedKey(String);

impl WrappedKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from the streaming cipher.
#[derive(Debug, Error)]
pub enum CipherError {
    /// Key material of the wrong size.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Ciphertext ended before the IV prefix was complete.
    #[error("ciphertext shorter than the {0}-byte IV header")]
    TruncatedHeader(usize),

    /// Reading the input or writing the output failed.
    #[error("stream IO error: {0}")]
    Io(#[from] std::io::Error),
}
