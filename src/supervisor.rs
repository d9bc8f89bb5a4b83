//! Process supervision
//!
//! Spawns the worker tasks that own the command queue and the broker
//! consumer, wires a shared cancellation token through both loops, and
//! exposes the queue's send side so the embedding harness can enqueue
//! commands from outside the worker context.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{BrokerConsumer, BrokerTransport};
use crate::device::SpecResolver;
use crate::router::{Command, DeviceRequestHandler, OperationRouter};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Signal handler setup failed: {0}")]
    Signal(String),

    #[error("Worker task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Capacity of the bounded command queue between harness and worker
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_command_buffer() -> usize {
    64
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            command_buffer: default_command_buffer(),
        }
    }
}

/// Handle to the spawned worker tasks
///
/// Owns the command queue's lifetime and the cancellation token. The
/// router and consumer loops honor the token at the top of each
/// iteration, so shutdown is testable without real process signals.
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    router_task: JoinHandle<()>,
    consumer_task: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Spawns the router worker alone; used when the embedding harness
    /// drives the controller purely through the command queue.
    pub fn spawn(
        settings: SupervisorSettings,
        handler: Arc<dyn DeviceRequestHandler>,
        specs: Arc<dyn SpecResolver>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (commands, rx) = mpsc::channel(settings.command_buffer);
        let router_task = spawn_router(rx, handler, specs, cancel.clone());
        info!("Supervisor spawned operation router worker");

        Self {
            commands,
            cancel,
            router_task,
            consumer_task: None,
        }
    }

    /// Spawns both workers: the operation router and the broker consumer.
    pub fn spawn_with_consumer<T>(
        settings: SupervisorSettings,
        handler: Arc<dyn DeviceRequestHandler>,
        specs: Arc<dyn SpecResolver>,
        consumer: BrokerConsumer<T>,
    ) -> Self
    where
        T: BrokerTransport + 'static,
    {
        let mut supervisor = Self::spawn(settings, handler, specs);
        let consumer_cancel = supervisor.cancel.clone();
        supervisor.consumer_task = Some(tokio::spawn(async move {
            if let Err(e) = consumer.run(consumer_cancel).await {
                error!("Broker consumer failed: {}", e);
            }
        }));
        info!("Supervisor spawned broker consumer worker");
        supervisor
    }

    /// Send side of the command queue; one producer, one consumer, FIFO.
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests shutdown of both worker loops.
    pub fn stop(&self) {
        info!("Stopping device controller workers");
        self.cancel.cancel();
    }

    /// Waits for the worker tasks to finish.
    pub async fn join(self) -> Result<(), SupervisorError> {
        self.router_task
            .await
            .map_err(|e| SupervisorError::Join(e.to_string()))?;
        if let Some(task) = self.consumer_task {
            task.await.map_err(|e| SupervisorError::Join(e.to_string()))?;
        }
        Ok(())
    }

    /// Blocks until SIGINT or SIGTERM, then stops the workers and joins
    /// them. The process is expected to exit 0 afterwards.
    pub async fn run_until_signalled(self) -> Result<(), SupervisorError> {
        wait_for_termination().await?;
        self.stop();
        self.join().await
    }
}

fn spawn_router(
    commands: mpsc::Receiver<Command>,
    handler: Arc<dyn DeviceRequestHandler>,
    specs: Arc<dyn SpecResolver>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let router = OperationRouter::new(commands, handler, specs);
    tokio::spawn(router.run(cancel))
}

#[cfg(unix)]
async fn wait_for_termination() -> Result<(), SupervisorError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).map_err(|e| SupervisorError::Signal(e.to_string()))?;
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| SupervisorError::Signal(e.to_string()))?;

    tokio::select! {
        _ = interrupt.recv() => warn!("SIGINT received, shutting down"),
        _ = terminate.recv() => warn!("SIGTERM received, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination() -> Result<(), SupervisorError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| SupervisorError::Signal(e.to_string()))?;
    warn!("Interrupt received, shutting down");
    Ok(())
}
