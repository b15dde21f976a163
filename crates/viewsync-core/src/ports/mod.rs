//! Port definitions
//!
//! - [`IChangeListener`] - Consumers of processed change events

pub mod listener;

pub use listener::IChangeListener;
