//! Retention of saved renderer frames.
//!
//! Renderers keep a snapshot of their last frame so navigating back is
//! instant. Those snapshots are expensive, so a single
//! [`FrameEvictionManager`] per process decides how many may stay resident
//! and asks the least recently used ones to drop their contents.

mod config;
mod frame;
mod handles;
mod manager;

pub use config::FrameBudgetConfig;
pub use frame::{EvictableFrame, FrameId};
pub use handles::SharedHandleCounter;
pub use manager::FrameEvictionManager;
