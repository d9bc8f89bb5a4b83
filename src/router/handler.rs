use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::device::DeviceSpec;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Attach failed: {0}")]
    Attach(String),

    #[error("Event delivery failed: {0}")]
    Event(String),
}

/// Outbound boundary to the device request handling collaborator
///
/// The controller consumes this interface; the actual attach/event side
/// effects live outside this crate. Calls are awaited inline by the
/// dispatch loop, so a slow handler delays subsequent commands.
#[async_trait]
pub trait DeviceRequestHandler: Send + Sync {
    async fn attach(&self, spec: DeviceSpec) -> Result<(), HandlerError>;

    async fn device_event(
        &self,
        device_uuid: &str,
        event_id: &str,
        payload: Value,
    ) -> Result<(), HandlerError>;

    async fn sub_device_event(
        &self,
        parent_uuid: &str,
        device_id: &str,
        event_id: &str,
        payload: Value,
    ) -> Result<(), HandlerError>;
}

/// Default handler for standalone runs: reports every request via logs
pub struct LogRequestHandler;

#[async_trait]
impl DeviceRequestHandler for LogRequestHandler {
    async fn attach(&self, spec: DeviceSpec) -> Result<(), HandlerError> {
        info!(
            "Attach request for {} at {}",
            spec.name,
            spec.address.as_deref().unwrap_or("<no address>")
        );
        Ok(())
    }

    async fn device_event(
        &self,
        device_uuid: &str,
        event_id: &str,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(
            "Device event {} for {} with payload {}",
            event_id, device_uuid, payload
        );
        Ok(())
    }

    async fn sub_device_event(
        &self,
        parent_uuid: &str,
        device_id: &str,
        event_id: &str,
        payload: Value,
    ) -> Result<(), HandlerError> {
        info!(
            "Sub-device event {} for {}/{} with payload {}",
            event_id, parent_uuid, device_id, payload
        );
        Ok(())
    }
}
