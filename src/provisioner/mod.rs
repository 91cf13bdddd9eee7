//! Per-principal data key provisioning.
//!
//! # Data Flow
//! ```text
//! get_or_create(principal)
//!     → KeyCache hit? return
//!     → per-principal lock → cache re-check
//!     → KeyStore read → KeyWrapService unwrap
//!     → or: new key → wrap → insert-if-absent (read back on conflict)
//!     → KeyCache insert
//! ```
//!
//! # Design Decisions
//! - Single-flight per principal; different principals never wait on each other
//! - Every external call is bounded by `call_timeout`
//! - Failures are never cached; the next call starts over

pub mod cache;
pub mod service;

pub use cache::{KeyCache, DEFAULT_CACHE_CAPACITY};
pub use service::{KeyProvisioner, ProvisionError, ProvisionerOptions, CACHE_CAPACITY_SETTING};
