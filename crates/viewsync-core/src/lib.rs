//! ViewSync Core - Domain types and configuration
//!
//! This crate contains what every other ViewSync crate shares:
//! - **Domain types** - `RawEvent`, `ChangeEvent`, `ChangeKind`, `ConfigError`
//! - **Configuration** - the JSON config file model and the `WatchConfig` snapshot
//! - **Snapshot store** - `ConfigStore`, atomic snapshot replacement with change notification
//! - **Port definitions** - `IChangeListener`, implemented by event consumers
//!
//! # Architecture
//!
//! The domain module has no I/O. The mirror engine in `viewsync-sync`
//! depends on these types and on the listener port; adapters such as the
//! change log in `viewsync-audit` implement the port.

pub mod config;
pub mod domain;
pub mod ports;
pub mod store;

pub use config::{Config, ConfigField, WatchConfig};
pub use domain::{ChangeEvent, ChangeKind, ConfigError, RawEvent, RawEventKind};
pub use ports::IChangeListener;
pub use store::ConfigStore;
