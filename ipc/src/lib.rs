//! Memory pressure control channel between processes.

use std::fmt;

mod endpoint;
mod filter;
mod message;

pub use endpoint::ChildEndpoint;
pub use filter::{channel, ChannelFilter, MessageSink};
pub use message::{decode, encode, IpcError, PressureMessage};

/// Stable identifier for an attached child process channel.
///
/// Only ever used as a lookup key.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Creates a new `ChannelId` from a raw numeric value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
