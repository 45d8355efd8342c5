//! Memory pressure levels and the per-process listener registry.
//!
//! Every process owns one [`PressureRegistry`]. Pressure sources call
//! [`PressureRegistry::notify`] for real events and
//! [`PressureRegistry::simulate`] for synthetic ones; only the former honours
//! the suppression switch.

mod level;
mod listener;
mod registry;

pub use level::{CurrentPressureLevel, ParseLevelError, PressureLevel, PressureLevelSource};
pub use listener::PressureListener;
pub use registry::{ListenerId, PressureCallback, PressureRegistry};
