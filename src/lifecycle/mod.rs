//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Start watcher → Key wrapping → Key store → Provisioner
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Background tasks observe → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Terminate
//!     SIGHUP → Reload configuration
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then key wrapping, then storage
//! - Shutdown is cooperative; tasks exit at their next await point

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{Signal, SignalListener};
pub use startup::{KeyWrapperSource, Services, StartupError, StartupOptions};
