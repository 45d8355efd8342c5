use serde::Deserialize;

const MAX_SAVED_FRAMES_CAP: usize = 5;
const MIN_SAVED_FRAMES: usize = 2;
const MB_PER_SAVED_FRAME: u64 = 256;
// Share of the process handle limit saved frames may occupy.
const HANDLE_LIMIT_DIVISOR: usize = 8;
const DEFAULT_HANDLE_LIMIT: usize = 1024;

/// Capacity limits for saved frames.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct FrameBudgetConfig {
    /// Frames kept when there is no memory pressure.
    pub max_saved_frames: usize,
    /// Shared handles saved frames may hold in total.
    pub max_handles: usize,
}

impl FrameBudgetConfig {
    /// Scales the budget to the machine: one extra frame per 256 MiB of RAM
    /// on top of two, at most five, and an eighth of the handle limit.
    pub fn for_system(physical_memory_mb: Option<u64>, handle_limit: usize) -> Self {
        let max_saved_frames = physical_memory_mb
            .map(|mb| {
                let scaled = MIN_SAVED_FRAMES as u64 + mb / MB_PER_SAVED_FRAME;
                scaled.min(MAX_SAVED_FRAMES_CAP as u64) as usize
            })
            .unwrap_or(MAX_SAVED_FRAMES_CAP);
        Self {
            max_saved_frames,
            max_handles: handle_limit / HANDLE_LIMIT_DIVISOR,
        }
    }
}

impl Default for FrameBudgetConfig {
    fn default() -> Self {
        Self {
            max_saved_frames: MAX_SAVED_FRAMES_CAP,
            max_handles: DEFAULT_HANDLE_LIMIT / HANDLE_LIMIT_DIVISOR,
        }
    }
}
