use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use pressure::PressureRegistry;

use crate::message::{decode, IpcError, PressureMessage};

/// Receiving end of the memory channel inside a child process.
///
/// Applies incoming messages to the child's own registry: suppression changes
/// flip its flag, simulations always reach listeners, and real notifications
/// are dropped while suppressed.
#[derive(Debug, Clone)]
pub struct ChildEndpoint {
    registry: Arc<PressureRegistry>,
}

impl ChildEndpoint {
    pub fn new(registry: Arc<PressureRegistry>) -> Self {
        Self { registry }
    }

    /// Decodes and applies one frame.
    pub fn dispatch(&self, frame: &str) -> Result<PressureMessage, IpcError> {
        let message = decode(frame)?;
        self.handle(message);
        Ok(message)
    }

    pub fn handle(&self, message: PressureMessage) {
        match message {
            PressureMessage::SetSuppressed { suppressed } => {
                self.registry.set_suppressed(suppressed);
            }
            PressureMessage::Simulate { level } => self.registry.simulate(level),
            PressureMessage::Notify { level } => self.registry.notify(level),
        }
    }

    /// Runs the receive loop on a new thread until the sending side hangs up.
    pub fn spawn(self, name: &str, receiver: Receiver<String>) -> io::Result<JoinHandle<()>> {
        let name = name.to_string();
        thread::Builder::new().name(name.clone()).spawn(move || {
            for frame in receiver {
                if let Err(err) = self.dispatch(&frame) {
                    warn!("{name}: rejected pressure message: {err}");
                }
            }
            debug!("{name}: memory channel closed");
        })
    }
}
