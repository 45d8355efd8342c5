//! `Memory` domain of the inspection protocol.

use std::sync::Arc;

use pressure::PressureLevel;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::PressureController;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum InspectorError {
    #[error("{0}")]
    InvalidParams(String),
    #[error("'{0}' wasn't found")]
    MethodNotFound(String),
}

#[derive(Debug, Deserialize)]
struct SetSuppressedParams {
    suppressed: bool,
}

#[derive(Debug, Deserialize)]
struct SimulateParams {
    level: String,
}

/// Thin adapter exposing suppression and simulation to debugging clients.
#[derive(Debug, Clone)]
pub struct MemoryDomain {
    controller: Arc<PressureController>,
}

impl MemoryDomain {
    pub fn new(controller: Arc<PressureController>) -> Self {
        Self { controller }
    }

    pub fn set_pressure_notifications_suppressed(
        &self,
        suppressed: bool,
    ) -> Result<(), InspectorError> {
        self.controller.set_suppressed_in_all_processes(suppressed);
        Ok(())
    }

    /// Accepts `moderate` or `critical`; anything else is rejected without
    /// touching any state.
    pub fn simulate_pressure_notification(&self, level: &str) -> Result<(), InspectorError> {
        let parsed = match level.parse::<PressureLevel>() {
            Ok(parsed @ (PressureLevel::Moderate | PressureLevel::Critical)) => parsed,
            _ => {
                return Err(InspectorError::InvalidParams(format!(
                    "Invalid memory pressure level '{level}'"
                )))
            }
        };
        self.controller.simulate_in_all_processes(parsed);
        Ok(())
    }

    /// Routes a protocol request by method name.
    pub fn handle(&self, method: &str, params: Value) -> Result<Value, InspectorError> {
        match method {
            "Memory.setPressureNotificationsSuppressed" => {
                let params: SetSuppressedParams = parse_params(params)?;
                self.set_pressure_notifications_suppressed(params.suppressed)?;
            }
            "Memory.simulatePressureNotification" => {
                let params: SimulateParams = parse_params(params)?;
                self.simulate_pressure_notification(&params.level)?;
            }
            other => return Err(InspectorError::MethodNotFound(other.to_string())),
        }
        Ok(json!({}))
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, InspectorError> {
    serde_json::from_value(params).map_err(|err| InspectorError::InvalidParams(err.to_string()))
}
