use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-wide count of shared memory handles backing saved frames.
#[derive(Debug, Default)]
pub struct SharedHandleCounter {
    allocated: AtomicUsize,
}

impl SharedHandleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, count: usize) {
        self.allocated.fetch_add(count, Ordering::AcqRel);
    }

    /// Releasing more than is allocated clamps at zero.
    pub fn release(&self, count: usize) {
        let _ = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }
}
