//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! config, provisioner, kms:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → stdout (text or JSON)
//!     → optional Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
