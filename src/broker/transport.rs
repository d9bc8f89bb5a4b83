use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use super::consumer::BrokerEvent;
use crate::config::BrokerSettings;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Transport request failed: {0}")]
    Transport(String),

    #[error("Broker event channel closed")]
    EventChannelClosed,
}

/// Transport boundary of the broker consumer
///
/// Every method only *requests* the corresponding protocol step; completion
/// is reported asynchronously as a [`BrokerEvent`] on the consumer's event
/// channel. A failed connection attempt surfaces as a `ConnectionClosed`
/// event, never as a synchronous error from `connect`.
#[async_trait]
pub trait BrokerTransport: Send {
    async fn connect(&mut self) -> Result<(), BrokerError>;
    async fn open_channel(&mut self) -> Result<(), BrokerError>;
    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError>;
    async fn start_consuming(&mut self, queues: &[String]) -> Result<(), BrokerError>;
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// MQTT-backed transport using rumqttc
///
/// Protocol mapping: CONNACK becomes `ConnectionOpened`, SUBACK becomes
/// `QueueDeclared`, PUBLISH becomes `Delivery`. MQTT multiplexes a single
/// logical session per connection, so `open_channel` completes immediately.
/// The driver task stops polling after the first connection error, which is
/// what makes connection loss terminal: there is no reconnect.
pub struct MqttTransport {
    settings: BrokerSettings,
    events: mpsc::Sender<BrokerEvent>,
    client: Option<AsyncClient>,
    driver: Option<tokio::task::JoinHandle<()>>,
    // Subscribe requests awaiting their SUBACK, in request order
    pending_declares: Arc<Mutex<VecDeque<String>>>,
    delivering: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Creates the transport together with the event channel its driver
    /// task will report completions on.
    pub fn channel(settings: BrokerSettings) -> (Self, mpsc::Receiver<BrokerEvent>) {
        let (events, events_rx) = mpsc::channel(64);
        let transport = Self {
            settings,
            events,
            client: None,
            driver: None,
            pending_declares: Arc::new(Mutex::new(VecDeque::new())),
            delivering: Arc::new(AtomicBool::new(false)),
        };
        (transport, events_rx)
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(Duration::from_secs(self.settings.keep_alive_secs));
        if let (Some(user), Some(password)) = (&self.settings.user, &self.settings.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        self.client = Some(client);
        self.driver = Some(tokio::spawn(drive(
            eventloop,
            self.events.clone(),
            self.pending_declares.clone(),
            self.delivering.clone(),
        )));
        debug!(
            "Connecting to broker at {}:{}",
            self.settings.host, self.settings.port
        );
        Ok(())
    }

    async fn open_channel(&mut self) -> Result<(), BrokerError> {
        self.events
            .send(BrokerEvent::ChannelOpened)
            .await
            .map_err(|_| BrokerError::EventChannelClosed)
    }

    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BrokerError::Transport("Not connected".to_string()))?;
        self.pending_declares.lock().await.push_back(queue.to_string());
        client
            .subscribe(queue, QoS::AtLeastOnce)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }

    async fn start_consuming(&mut self, queues: &[String]) -> Result<(), BrokerError> {
        self.delivering.store(true, Ordering::Release);
        debug!("Delivery enabled for {} queue(s)", queues.len());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                debug!("Disconnect request after connection loss: {}", e);
            }
        }
        Ok(())
    }
}

/// Polls the rumqttc event loop and maps packets onto broker events.
///
/// Ends on the first poll error or server disconnect; the resulting
/// `ConnectionClosed` leaves the consumer in its terminal state.
async fn drive(
    mut eventloop: EventLoop,
    events: mpsc::Sender<BrokerEvent>,
    pending_declares: Arc<Mutex<VecDeque<String>>>,
    delivering: Arc<AtomicBool>,
) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => Some(BrokerEvent::ConnectionOpened),
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                match pending_declares.lock().await.pop_front() {
                    Some(queue) => Some(BrokerEvent::QueueDeclared { queue }),
                    None => {
                        warn!("SUBACK without a pending queue declaration, ignoring");
                        None
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if delivering.load(Ordering::Acquire) {
                    Some(BrokerEvent::Delivery {
                        queue: publish.topic.clone(),
                        body: publish.payload.to_vec(),
                    })
                } else {
                    warn!(
                        "Dropping message on {} before consumption started",
                        publish.topic
                    );
                    None
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                let closed = BrokerEvent::ConnectionClosed {
                    reason: "Server requested disconnect".to_string(),
                };
                let _ = events.send(closed).await;
                break;
            }
            Ok(_) => None,
            Err(e) => {
                error!("Broker connection lost: {}", e);
                let closed = BrokerEvent::ConnectionClosed {
                    reason: e.to_string(),
                };
                let _ = events.send(closed).await;
                break;
            }
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                debug!("Broker event receiver dropped, stopping driver");
                break;
            }
        }
    }
}
