use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::trace;
use pressure::PressureLevel;
use serde::Deserialize;

const PROC_MEMINFO: &str = "/proc/meminfo";
const PROC_SELF_STATUS: &str = "/proc/self/status";
const PROC_SELF_CGROUP: &str = "/proc/self/cgroup";
const CGROUP_V2_ROOT: &str = "/sys/fs/cgroup";

/// Something that can tell how close the system is to running out of memory.
pub trait MemoryPressureSource {
    /// Takes one reading, or `None` when the source cannot be read.
    fn sample(&mut self, thresholds: &MemoryPressureThresholds) -> Option<MemoryPressureReading>;
}

/// Pressure thresholds as remaining headroom per-mille (0-1000).
///
/// Moderate starts at 20% headroom, where kernel reclaim usually kicks in.
/// Critical starts at 10%.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MemoryPressureThresholds {
    pub moderate_headroom_per_mille: u16,
    pub critical_headroom_per_mille: u16,
}

impl MemoryPressureThresholds {
    pub fn level_for(&self, headroom_per_mille: u16) -> PressureLevel {
        if headroom_per_mille <= self.critical_headroom_per_mille {
            PressureLevel::Critical
        } else if headroom_per_mille <= self.moderate_headroom_per_mille {
            PressureLevel::Moderate
        } else {
            PressureLevel::None
        }
    }
}

impl Default for MemoryPressureThresholds {
    fn default() -> Self {
        Self {
            moderate_headroom_per_mille: 200,
            critical_headroom_per_mille: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryPressureReading {
    pub level: PressureLevel,
    pub headroom_per_mille: u16,
    pub source: MemoryPressureSourceKind,
}

impl MemoryPressureReading {
    fn from_headroom(
        headroom: u64,
        total: u64,
        source: MemoryPressureSourceKind,
        thresholds: &MemoryPressureThresholds,
    ) -> Option<Self> {
        if total == 0 {
            return None;
        }
        let headroom_per_mille = (headroom.saturating_mul(1000) / total).min(1000) as u16;
        Some(Self {
            level: thresholds.level_for(headroom_per_mille),
            headroom_per_mille,
            source,
        })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemoryPressureSourceKind {
    CgroupV2,
    SystemMemInfo,
    ProcessRss,
}

/// Tries the process's cgroup v2 limit first, then system-wide
/// `/proc/meminfo`, then the process's own RSS against total memory.
#[derive(Debug)]
pub struct DefaultMemoryPressureSource {
    cgroup: Option<CgroupV2Source>,
    meminfo: ProcFile,
    status: ProcFile,
}

impl DefaultMemoryPressureSource {
    pub fn new() -> Self {
        Self {
            cgroup: CgroupV2Source::discover(),
            meminfo: ProcFile::new(PROC_MEMINFO),
            status: ProcFile::new(PROC_SELF_STATUS),
        }
    }

    fn sample_meminfo(
        &mut self,
        thresholds: &MemoryPressureThresholds,
    ) -> Option<MemoryPressureReading> {
        let text = self.meminfo.read()?;
        let total = kib_field(text, "MemTotal:")?;
        let available = kib_field(text, "MemAvailable:")?;
        MemoryPressureReading::from_headroom(
            available,
            total,
            MemoryPressureSourceKind::SystemMemInfo,
            thresholds,
        )
    }

    fn sample_rss(
        &mut self,
        thresholds: &MemoryPressureThresholds,
    ) -> Option<MemoryPressureReading> {
        let total = kib_field(self.meminfo.read()?, "MemTotal:")?;
        let rss = kib_field(self.status.read()?, "VmRSS:")?;
        MemoryPressureReading::from_headroom(
            total.saturating_sub(rss),
            total,
            MemoryPressureSourceKind::ProcessRss,
            thresholds,
        )
    }
}

impl Default for DefaultMemoryPressureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPressureSource for DefaultMemoryPressureSource {
    fn sample(&mut self, thresholds: &MemoryPressureThresholds) -> Option<MemoryPressureReading> {
        if let Some(reading) = self
            .cgroup
            .as_mut()
            .and_then(|cgroup| cgroup.sample(thresholds))
        {
            return Some(reading);
        }
        self.sample_meminfo(thresholds).or_else(|| self.sample_rss(thresholds))
    }
}

#[derive(Debug)]
struct CgroupV2Source {
    max: ProcFile,
    current: ProcFile,
}

impl CgroupV2Source {
    fn discover() -> Option<Self> {
        let mut membership = ProcFile::new(PROC_SELF_CGROUP);
        let dir = cgroup_v2_dir(membership.read()?)?;
        trace!("using cgroup v2 memory accounting at {}", dir.display());
        Some(Self {
            max: ProcFile::new(dir.join("memory.max")),
            current: ProcFile::new(dir.join("memory.current")),
        })
    }

    fn sample(&mut self, thresholds: &MemoryPressureThresholds) -> Option<MemoryPressureReading> {
        let limit = cgroup_limit(self.max.read()?)?;
        let current: u64 = self.current.read()?.trim().parse().ok()?;
        MemoryPressureReading::from_headroom(
            limit.saturating_sub(current),
            limit,
            MemoryPressureSourceKind::CgroupV2,
            thresholds,
        )
    }
}

/// A small kernel-provided file re-read on every sample into a reused buffer.
#[derive(Debug)]
struct ProcFile {
    path: PathBuf,
    text: String,
}

impl ProcFile {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            text: String::new(),
        }
    }

    fn read(&mut self) -> Option<&str> {
        self.text.clear();
        File::open(&self.path)
            .and_then(|mut file| file.read_to_string(&mut self.text))
            .ok()?;
        Some(&self.text)
    }
}

/// Directory of the unified hierarchy entry (`0::<path>`) in `/proc/self/cgroup`.
fn cgroup_v2_dir(membership: &str) -> Option<PathBuf> {
    let relative = membership
        .lines()
        .find_map(|line| line.strip_prefix("0::"))?;
    Some(Path::new(CGROUP_V2_ROOT).join(relative.trim().trim_start_matches('/')))
}

// "max" means unlimited, which leaves nothing to measure headroom against.
fn cgroup_limit(text: &str) -> Option<u64> {
    match text.trim() {
        "max" => None,
        value => value.parse().ok().filter(|limit| *limit > 0),
    }
}

/// Value of a `Name:   1234 kB` line, in bytes.
fn kib_field(text: &str, name: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let kib: u64 = line
            .strip_prefix(name)?
            .split_whitespace()
            .next()?
            .parse()
            .ok()?;
        Some(kib.saturating_mul(1024))
    })
}

/// Total physical memory in bytes.
pub(crate) fn meminfo_total_bytes() -> Option<u64> {
    kib_field(ProcFile::new(PROC_MEMINFO).read()?, "MemTotal:")
}
