//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to key service or key store:
//!     → timeouts.rs (deadline, reference value 10 seconds)
//!     → on expiry: retryable error to the caller, nothing cached
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No implicit retries: the caller sees the failure and may retry

pub mod timeouts;

pub use timeouts::{with_timeout, TimeoutError, DEFAULT_CALL_TIMEOUT};
