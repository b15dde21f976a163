//! TracingListener - change events as tracing records
//!
//! Stands in for desktop notifications: events the notification policy
//! would surface are logged at `info`, everything else at `debug`.

use viewsync_core::{ChangeEvent, ConfigStore, IChangeListener};

/// Reports change events through `tracing`
#[derive(Debug, Clone)]
pub struct TracingListener {
    store: ConfigStore,
}

impl TracingListener {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    /// Returns true if `event` would be surfaced to the user
    pub fn is_notifiable(&self, event: &ChangeEvent) -> bool {
        self.store.current().notify.should_notify(event.kind)
    }
}

impl IChangeListener for TracingListener {
    fn on_change(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        if self.is_notifiable(event) {
            tracing::info!(kind = %event.kind, title = %event.title, "{}", event.text);
        } else {
            tracing::debug!(kind = %event.kind, title = %event.title, "{}", event.text);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use viewsync_core::{ChangeKind, WatchConfig};

    use super::*;

    #[test]
    fn test_errors_always_notifiable() {
        let listener = TracingListener::new(ConfigStore::new(WatchConfig::default()));
        assert!(listener.is_notifiable(&ChangeEvent::error("boom")));
        assert!(!listener.is_notifiable(&ChangeEvent::new(ChangeKind::Created, "/out/a")));
    }

    #[test]
    fn test_per_kind_flags_apply_when_enabled() {
        let store = ConfigStore::new(WatchConfig::default());
        store.update(|c| {
            let mut next = c.clone();
            next.notify.enabled = true;
            next.notify.deleted = false;
            next
        });
        let listener = TracingListener::new(store);

        assert!(listener.is_notifiable(&ChangeEvent::new(ChangeKind::Changed, "/out/a")));
        assert!(!listener.is_notifiable(&ChangeEvent::new(ChangeKind::Deleted, "/out/a")));
        assert!(listener
            .on_change(&ChangeEvent::new(ChangeKind::Deleted, "/out/a"))
            .is_ok());
    }
}
