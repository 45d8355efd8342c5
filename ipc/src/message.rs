use pressure::PressureLevel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Control message exchanged between the coordinating process and a child.
///
/// Encoded as `{"type": ..., "payload": ...}` JSON frames.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PressureMessage {
    #[serde(rename = "memory.set_suppressed")]
    SetSuppressed { suppressed: bool },
    #[serde(rename = "memory.simulate")]
    Simulate { level: PressureLevel },
    #[serde(rename = "memory.notify")]
    Notify { level: PressureLevel },
}

impl PressureMessage {
    fn validate(self) -> Result<Self, IpcError> {
        match self {
            Self::Simulate {
                level: PressureLevel::None,
            }
            | Self::Notify {
                level: PressureLevel::None,
            } => Err(IpcError::InvalidLevel(PressureLevel::None)),
            message => Ok(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("malformed pressure message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("pressure level '{0}' is not allowed on the wire")]
    InvalidLevel(PressureLevel),
    #[error("channel disconnected")]
    Disconnected,
}

pub fn encode(message: &PressureMessage) -> Result<String, IpcError> {
    let message = message.validate()?;
    Ok(serde_json::to_string(&message)?)
}

pub fn decode(frame: &str) -> Result<PressureMessage, IpcError> {
    let message: PressureMessage = serde_json::from_str(frame)?;
    message.validate()
}
