use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::command::{Command, OperationTag};
use super::handler::{DeviceRequestHandler, HandlerError};
use crate::device::{SpecError, SpecResolver};

// Host portion of the synthesized device address; the last octet is the
// device's numeric controller id.
const DEVICE_SUBNET: &str = "192.168.0";

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Spec resolution failed: {0}")]
    Spec(#[from] SpecError),

    #[error("Handler call failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("Event operation without an id for device {0}")]
    MissingEventId(String),
}

/// Dispatch loop pulling `(device, operation)` commands in FIFO order
///
/// Exclusively owns the receiving end of the command queue. A failure
/// while processing one command is logged and never terminates the loop;
/// only cancellation or a dropped send side ends it.
pub struct OperationRouter {
    commands: mpsc::Receiver<Command>,
    handler: Arc<dyn DeviceRequestHandler>,
    specs: Arc<dyn SpecResolver>,
}

impl OperationRouter {
    pub fn new(
        commands: mpsc::Receiver<Command>,
        handler: Arc<dyn DeviceRequestHandler>,
        specs: Arc<dyn SpecResolver>,
    ) -> Self {
        Self {
            commands,
            handler,
            specs,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Operation router started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Operation router cancelled");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        debug!(
                            "Router got {:?} for device {}",
                            command.operation, command.device.uuid
                        );
                        // Per-command failure isolation: one bad command
                        // must never take the loop down.
                        if let Err(e) = self.dispatch(command).await {
                            error!("Command processing failed: {}", e);
                        }
                    }
                    None => {
                        info!("Command queue closed, operation router stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<(), RouterError> {
        let Command {
            device,
            operation,
            payload,
        } = command;

        match OperationTag::classify(operation.tag()) {
            OperationTag::Attach => {
                let mut spec = self.specs.resolve(&device)?;
                spec.address = Some(format!("{}.{}", DEVICE_SUBNET, device.ctl_id));
                self.handler.attach(spec).await?;
            }
            OperationTag::Event => {
                let event_id = operation
                    .id()
                    .ok_or_else(|| RouterError::MissingEventId(device.uuid.clone()))?;
                match &device.parent {
                    // No parent means top-level device
                    None => {
                        let payload = payload.unwrap_or_else(|| json!({ "data": 666 }));
                        self.handler
                            .device_event(&device.uuid, event_id, payload)
                            .await?;
                    }
                    Some(parent) => {
                        let payload = payload.unwrap_or_else(|| json!({ "data": "subdevice" }));
                        self.handler
                            .sub_device_event(&parent.uuid, &device.device_id, event_id, payload)
                            .await?;
                    }
                }
            }
            OperationTag::Unrecognized(tag) => {
                warn!("Unrecognized operation tag: {}", tag);
            }
        }
        Ok(())
    }
}
