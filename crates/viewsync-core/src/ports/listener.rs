//! Change listener port (driven/secondary port)
//!
//! Listeners receive every [`ChangeEvent`] the router emits. Delivery is
//! synchronous and happens on the task that processed the raw event, so
//! implementations should return quickly.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because listener failures are adapter-specific.
//! - A failing listener never affects the router or the other listeners;
//!   the router logs the error and moves on.

use crate::domain::ChangeEvent;

/// Port trait for consumers of processed change events
pub trait IChangeListener: Send + Sync {
    /// Called once per emitted change event
    fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()>;
}

impl<F> IChangeListener for F
where
    F: Fn(&ChangeEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        self(event)
    }
}
