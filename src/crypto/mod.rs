//! Envelope cipher subsystem.
//!
//! # Data Flow
//! ```text
//! upload:   DataKey + plaintext stream → stream.rs encrypt → [IV][ciphertext]
//! download: DataKey + [IV][ciphertext] → stream.rs decrypt → plaintext stream
//! ```
//!
//! # Security Constraints
//! - Keys come only from `EnvelopeCipher::new_key` (OS CSPRNG) or an unwrap
//! - Key bytes are zeroized on drop and never logged
//! - Confidentiality only: the blob carries no integrity tag, kept for
//!   compatibility with existing ciphertext

pub mod stream;
pub mod types;

pub use stream::{ciphertext_len, decrypt_bytes, encrypt_bytes, EnvelopeCipher, IV_LEN};
pub use types::{CipherError, DataKey, WrappedKey, DATA_KEY_LEN};
