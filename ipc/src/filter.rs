use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};

use log::{debug, trace};
use pressure::PressureLevel;

use crate::message::{encode, IpcError, PressureMessage};
use crate::ChannelId;

/// Transport that carries encoded frames to one child process.
pub trait MessageSink: Send + Sync {
    fn send_frame(&self, frame: String) -> Result<(), IpcError>;
}

impl MessageSink for Sender<String> {
    fn send_frame(&self, frame: String) -> Result<(), IpcError> {
        self.send(frame).map_err(|_| IpcError::Disconnected)
    }
}

/// Sending end of the memory channel to a single child process.
///
/// Sends are fire-and-forget: a child that went away simply stops receiving.
pub struct ChannelFilter {
    id: ChannelId,
    sink: Box<dyn MessageSink>,
}

impl ChannelFilter {
    pub fn new<S: MessageSink + 'static>(id: ChannelId, sink: S) -> Self {
        Self {
            id,
            sink: Box::new(sink),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn send_set_suppressed(&self, suppressed: bool) {
        self.send(PressureMessage::SetSuppressed { suppressed });
    }

    /// # Panics
    ///
    /// Panics if `level` is [`PressureLevel::None`].
    pub fn send_simulate(&self, level: PressureLevel) {
        assert_ne!(level, PressureLevel::None, "cannot simulate the none level");
        self.send(PressureMessage::Simulate { level });
    }

    /// # Panics
    ///
    /// Panics if `level` is [`PressureLevel::None`].
    pub fn send_notify(&self, level: PressureLevel) {
        assert_ne!(level, PressureLevel::None, "cannot notify the none level");
        self.send(PressureMessage::Notify { level });
    }

    fn send(&self, message: PressureMessage) {
        match encode(&message).and_then(|frame| self.sink.send_frame(frame)) {
            Ok(()) => trace!("sent {message:?} to channel {}", self.id),
            Err(err) => debug!("dropped {message:?} for channel {}: {err}", self.id),
        }
    }
}

impl fmt::Debug for ChannelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelFilter").field("id", &self.id).finish()
    }
}

/// Creates an in-process channel: the filter for the coordinator and the
/// receiver to hand to the child's [`ChildEndpoint`](crate::ChildEndpoint).
pub fn channel(id: ChannelId) -> (ChannelFilter, Receiver<String>) {
    let (sender, receiver) = mpsc::channel();
    (ChannelFilter::new(id, sender), receiver)
}
