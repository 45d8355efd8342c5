use std::collections::HashMap;
use std::sync::Arc;

use ipc::{ChannelFilter, ChannelId};

/// Attached channel filters keyed by child channel id.
#[derive(Debug, Default)]
pub(crate) struct ChannelMap {
    filters: HashMap<ChannelId, Arc<ChannelFilter>>,
}

impl ChannelMap {
    /// # Panics
    ///
    /// Panics if a filter with the same id is already attached.
    pub(crate) fn insert(&mut self, filter: Arc<ChannelFilter>) {
        let id = filter.id();
        assert!(
            !self.filters.contains_key(&id),
            "channel {id} is already attached"
        );
        self.filters.insert(id, filter);
    }

    /// # Panics
    ///
    /// Panics if no filter with this id is attached.
    pub(crate) fn remove(&mut self, id: ChannelId) -> Arc<ChannelFilter> {
        self.filters
            .remove(&id)
            .unwrap_or_else(|| panic!("channel {id} is not attached"))
    }

    pub(crate) fn get(&self, id: ChannelId) -> Option<Arc<ChannelFilter>> {
        self.filters.get(&id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.filters.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<ChannelFilter>> {
        self.filters.values().cloned().collect()
    }
}
