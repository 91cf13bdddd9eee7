//! Per-principal envelope encryption with hot-reloaded settings.
//!
//! ```text
//!   settings file ──watch──▶ config::ConfigStore ──snapshot──┐
//!                                                            ▼
//!   principal ──▶ provisioner::KeyProvisioner ──▶ kms::KeyWrapService
//!                      │        │                      (wrap / unwrap)
//!                      │        └──▶ keystore::KeyStore (wrapped keys)
//!                      ▼
//!                 crypto::DataKey ──▶ crypto::EnvelopeCipher ──▶ [IV][ciphertext]
//! ```

// Core subsystems
pub mod config;
pub mod crypto;
pub mod keystore;
pub mod kms;
pub mod provisioner;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::ConfigStore;
pub use crypto::{DataKey, EnvelopeCipher, WrappedKey};
pub use lifecycle::{Services, Shutdown, StartupOptions};
pub use provisioner::{KeyProvisioner, ProvisionError, ProvisionerOptions};
