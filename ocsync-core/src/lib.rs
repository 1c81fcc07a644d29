//! ocsync core library — configuration record, status values, persistence.
//!
//! - [`types`] — [`Configuration`], [`Protocol`], [`SyncStatus`], [`SyncInvocation`]
//! - [`error`] — [`ConfigError`]
//! - [`store`] — the [`ConfigStore`] capability and its YAML / in-memory backends

pub mod error;
pub mod store;
pub mod types;

pub use error::ConfigError;
pub use store::{ConfigStore, MemoryConfigStore, YamlConfigStore};
pub use types::{Configuration, Protocol, SyncInvocation, SyncStatus, TRANSIENT_MARKER};
