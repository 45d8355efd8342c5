use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse memory pressure signal, ordered by severity.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    /// No pressure. Only used as a state; never broadcast.
    #[default]
    None,
    Moderate,
    Critical,
}

impl PressureLevel {
    /// Share of the normal cache capacity that may stay resident at this level.
    pub fn budget_percentage(self) -> usize {
        match self {
            Self::None => 100,
            Self::Moderate => 50,
            Self::Critical => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Moderate => "moderate",
            Self::Critical => "critical",
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Moderate => 1,
            Self::Critical => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Moderate,
            2 => Self::Critical,
            _ => Self::None,
        }
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
#[error("unknown memory pressure level '{0}'")]
pub struct ParseLevelError(pub String);

impl FromStr for PressureLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "moderate" => Ok(Self::Moderate),
            "critical" => Ok(Self::Critical),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

/// Query surface for the process-wide pressure level.
///
/// Implementations must be callable from any thread without blocking.
pub trait PressureLevelSource: Send + Sync {
    fn current_level(&self) -> PressureLevel;
}

/// Lock-free cell holding the latest observed level.
#[derive(Debug, Default)]
pub struct CurrentPressureLevel {
    raw: AtomicU8,
}

impl CurrentPressureLevel {
    pub fn new(level: PressureLevel) -> Self {
        Self {
            raw: AtomicU8::new(level.to_raw()),
        }
    }

    /// Stores `level`, returning the previous value.
    pub fn set(&self, level: PressureLevel) -> PressureLevel {
        PressureLevel::from_raw(self.raw.swap(level.to_raw(), Ordering::AcqRel))
    }

    pub fn get(&self) -> PressureLevel {
        PressureLevel::from_raw(self.raw.load(Ordering::Acquire))
    }
}

impl PressureLevelSource for CurrentPressureLevel {
    fn current_level(&self) -> PressureLevel {
        self.get()
    }
}
