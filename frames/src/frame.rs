use std::fmt;

/// Stable identifier for a saved frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FrameId(u64);

impl FrameId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner of a saved frame that can be told to drop it.
pub trait EvictableFrame: Send + Sync {
    /// Releases the saved frame. Implementations are expected to call
    /// [`FrameEvictionManager::remove_frame`](crate::FrameEvictionManager::remove_frame)
    /// for their own id before returning.
    fn evict_current_frame(&self);
}
