//! Cross-process memory pressure coordination.
//!
//! The coordinating process owns one [`PressureController`], created by its
//! composition root and shared with whatever attaches child channels or
//! produces pressure events.

mod channels;
mod controller;
pub mod inspector;

pub use controller::PressureController;
pub use inspector::{InspectorError, MemoryDomain};
