//! Key-wrapping subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigStore (project, encryption.location/keyring/key, encryption.endpoint)
//!     → types.rs KmsKeyPath (resource name, rebuilt per call)
//!     → client.rs CloudKmsClient (:encrypt / :decrypt over HTTPS)
//!
//! local.rs LocalKeyWrapper: same contract, master key held in process
//! ```
//!
//! # Security Constraints
//! - Bearer tokens and master keys ONLY from environment variables
//! - Never log key material, wrapped or not
//! - Calls are network operations: callers put a deadline on them

pub mod client;
pub mod local;
pub mod types;

pub use client::CloudKmsClient;
pub use local::LocalKeyWrapper;
pub use types::{KeyServiceError, KeyWrapService, KmsKeyPath};
