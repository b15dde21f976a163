//! Domain entities
//!
//! - Raw and processed change events
//! - Configuration error types

pub mod change;
pub mod errors;

pub use change::{ChangeEvent, ChangeKind, RawEvent, RawEventKind, ERROR_TITLE};
pub use errors::ConfigError;
