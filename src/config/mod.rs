//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! settings file (JSON or TOML)
//!     → loader.rs (read & parse into a ConfigSnapshot)
//!     → store.rs (ConfigStore: current snapshot in an ArcSwap)
//!     → get("encryption.keyring") from any task, lock-free
//!
//! On file change:
//!     watcher.rs receives a notify event
//!     → debounce window restarts, watch is re-armed
//!     → window elapses: store.reload()
//!     → validation.rs runs validators in order (old, &mut candidate)
//!     → accepted: single atomic swap; rejected: current snapshot stands
//! ```
//!
//! # Design Decisions
//! - No global config: the store is an owned `Arc` handed to each consumer
//! - Snapshots are immutable once published; a reload replaces the whole tree
//! - Lookups never fail: absent paths yield `""` or an empty list
//! - Startup load failure is fatal, reload failure is logged and ignored

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{ConfigError, DocumentFormat};
pub use schema::ConfigSnapshot;
pub use store::ConfigStore;
pub use validation::{ConfigValidator, RequireKeys, ValidationError};
pub use watcher::{ConfigWatch, WatchOptions};
