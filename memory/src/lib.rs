//! System memory pressure detection.
//!
//! Sources read cgroup v2, `/proc/meminfo` or process RSS and map the
//! remaining headroom onto a [`PressureLevel`](pressure::PressureLevel). The
//! monitor polls a source on its own thread and decides when listeners should
//! hear about it.

mod monitor;
mod source;
mod system;

pub use monitor::{MemoryPressureMonitor, MonitorConfig};
pub use source::{
    DefaultMemoryPressureSource, MemoryPressureReading, MemoryPressureSource,
    MemoryPressureSourceKind, MemoryPressureThresholds,
};
pub use system::{handle_limit, physical_memory_mb};
