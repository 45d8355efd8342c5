use std::sync::atomic::{AtomicU64, Ordering};

pub mod task_runner;

pub use task_runner::{TaskRunner, TaskThread};

/// Monotonic id generator for in-process identifiers.
///
/// Safe to share between threads; ids are never handed out twice.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Creates a new generator starting at the provided value.
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Returns the next id in sequence.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}
