//! Wrapped-key persistence.
//!
//! # Data Flow
//! ```text
//! KeyProvisioner miss
//!     → get_wrapped_key(principal)             (read)
//!     → put_wrapped_key_if_absent(principal)   (first use only)
//!         memory.rs: DashMap entry API
//!         file.rs:   JSON file, temp file + rename
//! ```
//!
//! # Design Decisions
//! - Only wrapped keys are stored; plaintext DEKs never reach this layer
//! - Insert-if-absent is the only write: records are never overwritten

pub mod file;
pub mod memory;
pub mod types;

pub use file::FileKeyStore;
pub use memory::MemoryKeyStore;
pub use types::{KeyStore, PrincipalKeyRecord, StoreError};
