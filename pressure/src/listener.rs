use std::sync::Arc;

use crate::level::PressureLevel;
use crate::registry::{ListenerId, PressureRegistry};

/// Scoped registration with a [`PressureRegistry`].
///
/// Registered on construction and unregistered when dropped.
#[derive(Debug)]
pub struct PressureListener {
    id: ListenerId,
    registry: Arc<PressureRegistry>,
}

impl PressureListener {
    pub fn new<F>(registry: &Arc<PressureRegistry>, callback: F) -> Self
    where
        F: Fn(PressureLevel) + Send + Sync + 'static,
    {
        let id = registry.register(callback);
        Self {
            id,
            registry: Arc::clone(registry),
        }
    }

    /// Creates a listener that also receives every level synchronously on the
    /// broadcasting thread.
    pub fn with_sync<F, S>(registry: &Arc<PressureRegistry>, callback: F, sync_callback: S) -> Self
    where
        F: Fn(PressureLevel) + Send + Sync + 'static,
        S: Fn(PressureLevel) + Send + Sync + 'static,
    {
        let id = registry.register_with_sync(callback, sync_callback);
        Self {
            id,
            registry: Arc::clone(registry),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for PressureListener {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dropping_the_listener_unregisters_it() {
        let registry = Arc::new(PressureRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let listener = PressureListener::new(&registry, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.broadcast(PressureLevel::Moderate);
        assert_eq!(registry.listener_count(), 1);

        drop(listener);
        registry.broadcast(PressureLevel::Moderate);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count(), 0);
    }
}
