use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::transport::{BrokerError, BrokerTransport};

/// Connection lifecycle states of the broker consumer
///
/// `Closed` is terminal; there is no transition back to `Connecting`.
/// Connection loss requires an external process restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerState {
    Init,
    Connecting,
    Connected,
    ChannelOpening,
    ChannelOpen,
    /// Queue declarations in flight; progress is tracked by the
    /// declared-set, which can never exceed the configured queue count.
    Declaring,
    Consuming,
    Closing,
    Closed,
}

/// Completion events reported by the transport
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    ConnectionOpened,
    ConnectionClosed { reason: String },
    ChannelOpened,
    ChannelClosed { reason: String },
    QueueDeclared { queue: String },
    Delivery { queue: String, body: Vec<u8> },
}

/// Hand-off point for inbound message bodies
///
/// The message body format is opaque to the consumer.
pub trait MessageHandler: Send + Sync {
    fn handle_message(&self, queue: &str, body: &[u8]);
}

/// Placeholder handler used until the embedding system supplies one
pub struct NoopMessageHandler;

impl MessageHandler for NoopMessageHandler {
    fn handle_message(&self, _queue: &str, _body: &[u8]) {}
}

/// Broker consumer driving the connection lifecycle state machine
///
/// Owns one connection, one channel on that connection, and a fixed set
/// of named queues. All transitions happen in `handle_event` as reactions
/// to completion events pulled from a single channel; nothing mutates the
/// state from another task.
pub struct BrokerConsumer<T: BrokerTransport> {
    state: ConsumerState,
    queues: Vec<String>,
    declared: HashSet<String>,
    transport: T,
    events: mpsc::Receiver<BrokerEvent>,
    handler: Arc<dyn MessageHandler>,
    stop_requested: bool,
}

impl<T: BrokerTransport> BrokerConsumer<T> {
    pub fn new(queues: Vec<String>, transport: T, events: mpsc::Receiver<BrokerEvent>) -> Self {
        Self {
            state: ConsumerState::Init,
            queues,
            declared: HashSet::new(),
            transport,
            events,
            handler: Arc::new(NoopMessageHandler),
            stop_requested: false,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn state(&self) -> &ConsumerState {
        &self.state
    }

    /// Runs the consumer until cancelled or the connection reaches its
    /// terminal state. Cancellation closes the connection before the loop
    /// halts.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BrokerError> {
        self.connect().await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Broker consumer cancelled");
                    self.stop().await;
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event).await?;
                        if self.state == ConsumerState::Closed {
                            break;
                        }
                    }
                    None => {
                        debug!("Broker event stream ended");
                        self.stop().await;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Requests the connection; completion arrives as a `ConnectionOpened`
    /// event. A failed attempt surfaces only via `ConnectionClosed`.
    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        info!("Connecting to broker");
        self.transport.connect().await?;
        self.state = ConsumerState::Connecting;
        Ok(())
    }

    /// Single transition function of the lifecycle state machine
    pub async fn handle_event(&mut self, event: BrokerEvent) -> Result<(), BrokerError> {
        match (self.state.clone(), event) {
            (ConsumerState::Connecting, BrokerEvent::ConnectionOpened) => {
                debug!("Opened connection to broker");
                self.state = ConsumerState::Connected;
                self.transport.open_channel().await?;
                self.state = ConsumerState::ChannelOpening;
            }
            (ConsumerState::ChannelOpening, BrokerEvent::ChannelOpened) => {
                debug!("Opened channel to broker");
                self.state = ConsumerState::ChannelOpen;
                for queue in &self.queues {
                    self.transport.declare_queue(queue).await?;
                }
                self.state = ConsumerState::Declaring;
            }
            (ConsumerState::Declaring, BrokerEvent::QueueDeclared { queue }) => {
                if !self.queues.contains(&queue) {
                    warn!("Declare completion for unknown queue: {}", queue);
                    return Ok(());
                }
                if !self.declared.insert(queue.clone()) {
                    warn!("Duplicate declare completion for queue {}, ignoring", queue);
                    return Ok(());
                }
                debug!(
                    "Queue {} declared ({}/{})",
                    queue,
                    self.declared.len(),
                    self.queues.len()
                );
                if self.declared.len() == self.queues.len() {
                    self.start_consuming().await?;
                }
            }
            (ConsumerState::Consuming, BrokerEvent::Delivery { queue, body }) => {
                debug!("Message on queue {} ({} bytes)", queue, body.len());
                self.handler.handle_message(&queue, &body);
            }
            (_, BrokerEvent::ConnectionClosed { reason }) => {
                if self.stop_requested {
                    debug!("Connection closed: {}", reason);
                } else {
                    // Terminal: no reconnect, an external supervisor must
                    // restart the process.
                    error!("Connection closed unexpectedly: {}", reason);
                }
                self.state = ConsumerState::Closed;
            }
            (_, BrokerEvent::ChannelClosed { reason }) => {
                warn!("Channel closed unexpectedly: {}", reason);
            }
            (state, event) => {
                warn!("Ignoring {:?} in state {:?}", event, state);
            }
        }
        Ok(())
    }

    async fn start_consuming(&mut self) -> Result<(), BrokerError> {
        self.transport.start_consuming(&self.queues).await?;
        self.state = ConsumerState::Consuming;
        info!("Consuming on {} queue(s)", self.queues.len());
        Ok(())
    }

    /// Closes the connection and marks the consumer as closing.
    ///
    /// Idempotent and infallible: a second call, or a call after the
    /// connection already closed, does nothing.
    pub async fn stop(&mut self) {
        if self.stop_requested || self.state == ConsumerState::Closed {
            debug!("Broker consumer already stopping");
            return;
        }
        self.stop_requested = true;
        self.state = ConsumerState::Closing;
        if let Err(e) = self.transport.close().await {
            warn!("Error closing broker connection: {}", e);
        }
        info!("Broker consumer stopped");
    }

    /// Termination-signal path: logs and stops, never re-raises.
    pub async fn terminate(&mut self) {
        warn!("Termination signal received, stopping broker consumer");
        self.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TransportLog {
        calls: Mutex<Vec<String>>,
    }

    impl TransportLog {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
        }
    }

    struct MockTransport {
        log: Arc<TransportLog>,
    }

    #[async_trait]
    impl BrokerTransport for MockTransport {
        async fn connect(&mut self) -> Result<(), BrokerError> {
            self.log.record("connect");
            Ok(())
        }

        async fn open_channel(&mut self) -> Result<(), BrokerError> {
            self.log.record("open_channel");
            Ok(())
        }

        async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
            self.log.record(format!("declare:{}", queue));
            Ok(())
        }

        async fn start_consuming(&mut self, _queues: &[String]) -> Result<(), BrokerError> {
            self.log.record("start_consuming");
            Ok(())
        }

        async fn close(&mut self) -> Result<(), BrokerError> {
            self.log.record("close");
            Ok(())
        }
    }

    fn consumer_with_queues(
        queues: &[&str],
    ) -> (
        BrokerConsumer<MockTransport>,
        mpsc::Sender<BrokerEvent>,
        Arc<TransportLog>,
    ) {
        let log = Arc::new(TransportLog::default());
        let transport = MockTransport { log: log.clone() };
        let (tx, rx) = mpsc::channel(16);
        let queues = queues.iter().map(|q| q.to_string()).collect();
        (BrokerConsumer::new(queues, transport, rx), tx, log)
    }

    async fn bring_to_declaring(consumer: &mut BrokerConsumer<MockTransport>) {
        consumer.connect().await.unwrap();
        consumer
            .handle_event(BrokerEvent::ConnectionOpened)
            .await
            .unwrap();
        consumer
            .handle_event(BrokerEvent::ChannelOpened)
            .await
            .unwrap();
        assert_eq!(*consumer.state(), ConsumerState::Declaring);
    }

    #[tokio::test]
    async fn consuming_waits_for_all_declarations() {
        let (mut consumer, _tx, log) = consumer_with_queues(&["cmd", "events"]);
        bring_to_declaring(&mut consumer).await;

        consumer
            .handle_event(BrokerEvent::QueueDeclared {
                queue: "cmd".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(*consumer.state(), ConsumerState::Declaring);
        assert_eq!(log.count("start_consuming"), 0);

        consumer
            .handle_event(BrokerEvent::QueueDeclared {
                queue: "events".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(*consumer.state(), ConsumerState::Consuming);
        assert_eq!(log.count("start_consuming"), 1);
    }

    #[tokio::test]
    async fn declarations_complete_in_reverse_order() {
        let (mut consumer, _tx, log) = consumer_with_queues(&["cmd", "events"]);
        bring_to_declaring(&mut consumer).await;

        // Completion order across queues is not guaranteed
        for queue in ["events", "cmd"] {
            consumer
                .handle_event(BrokerEvent::QueueDeclared {
                    queue: queue.to_string(),
                })
                .await
                .unwrap();
        }
        assert_eq!(*consumer.state(), ConsumerState::Consuming);
        assert_eq!(log.count("start_consuming"), 1);
    }

    #[tokio::test]
    async fn duplicate_declaration_is_not_double_counted() {
        let (mut consumer, _tx, log) = consumer_with_queues(&["cmd", "events"]);
        bring_to_declaring(&mut consumer).await;

        for _ in 0..2 {
            consumer
                .handle_event(BrokerEvent::QueueDeclared {
                    queue: "cmd".to_string(),
                })
                .await
                .unwrap();
        }
        assert_eq!(*consumer.state(), ConsumerState::Declaring);
        assert_eq!(log.count("start_consuming"), 0);
    }

    #[tokio::test]
    async fn single_queue_starts_consuming_on_first_declaration() {
        let (mut consumer, _tx, log) = consumer_with_queues(&["cmd"]);
        bring_to_declaring(&mut consumer).await;

        consumer
            .handle_event(BrokerEvent::QueueDeclared {
                queue: "cmd".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(*consumer.state(), ConsumerState::Consuming);
        assert_eq!(
            log.calls(),
            vec!["connect", "open_channel", "declare:cmd", "start_consuming"]
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (mut consumer, _tx, log) = consumer_with_queues(&["cmd"]);
        consumer.connect().await.unwrap();

        consumer.stop().await;
        consumer.stop().await;
        assert_eq!(log.count("close"), 1);
        assert_eq!(*consumer.state(), ConsumerState::Closing);
    }

    #[tokio::test]
    async fn terminate_stops_the_consumer() {
        let (mut consumer, _tx, log) = consumer_with_queues(&["cmd"]);
        consumer.connect().await.unwrap();

        consumer.terminate().await;
        assert_eq!(log.count("close"), 1);
        assert_eq!(*consumer.state(), ConsumerState::Closing);
    }

    #[tokio::test]
    async fn stop_after_closed_does_not_reclose() {
        let (mut consumer, _tx, log) = consumer_with_queues(&["cmd"]);
        consumer.connect().await.unwrap();
        consumer
            .handle_event(BrokerEvent::ConnectionClosed {
                reason: "broker went away".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(*consumer.state(), ConsumerState::Closed);

        consumer.stop().await;
        assert_eq!(log.count("close"), 0);
        assert_eq!(*consumer.state(), ConsumerState::Closed);
    }

    #[tokio::test]
    async fn unexpected_close_is_terminal() {
        let (mut consumer, _tx, _log) = consumer_with_queues(&["cmd", "events"]);
        bring_to_declaring(&mut consumer).await;

        consumer
            .handle_event(BrokerEvent::ConnectionClosed {
                reason: "socket reset".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(*consumer.state(), ConsumerState::Closed);

        // A late completion must not resurrect the connection
        consumer
            .handle_event(BrokerEvent::QueueDeclared {
                queue: "cmd".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(*consumer.state(), ConsumerState::Closed);
    }

    #[tokio::test]
    async fn channel_close_does_not_reopen() {
        let (mut consumer, _tx, log) = consumer_with_queues(&["cmd"]);
        bring_to_declaring(&mut consumer).await;

        consumer
            .handle_event(BrokerEvent::ChannelClosed {
                reason: "channel error".to_string(),
            })
            .await
            .unwrap();
        // Logged only; exactly one channel was ever requested
        assert_eq!(log.count("open_channel"), 1);
    }

    #[tokio::test]
    async fn delivery_reaches_handler() {
        struct Recorder(Mutex<Vec<(String, Vec<u8>)>>);

        impl MessageHandler for Recorder {
            fn handle_message(&self, queue: &str, body: &[u8]) {
                self.0.lock().unwrap().push((queue.to_string(), body.to_vec()));
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let (consumer, _tx, _log) = consumer_with_queues(&["cmd"]);
        let mut consumer = consumer.with_handler(recorder.clone());
        bring_to_declaring(&mut consumer).await;
        consumer
            .handle_event(BrokerEvent::QueueDeclared {
                queue: "cmd".to_string(),
            })
            .await
            .unwrap();

        consumer
            .handle_event(BrokerEvent::Delivery {
                queue: "cmd".to_string(),
                body: b"hello".to_vec(),
            })
            .await
            .unwrap();

        let received = recorder.0.lock().unwrap().clone();
        assert_eq!(received, vec![("cmd".to_string(), b"hello".to_vec())]);
    }

    #[tokio::test]
    async fn delivery_before_consuming_is_ignored() {
        struct Panicker;

        impl MessageHandler for Panicker {
            fn handle_message(&self, _queue: &str, _body: &[u8]) {
                panic!("handler must not run before consumption starts");
            }
        }

        let (consumer, _tx, _log) = consumer_with_queues(&["cmd"]);
        let mut consumer = consumer.with_handler(Arc::new(Panicker));
        bring_to_declaring(&mut consumer).await;

        consumer
            .handle_event(BrokerEvent::Delivery {
                queue: "cmd".to_string(),
                body: b"early".to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(*consumer.state(), ConsumerState::Declaring);
    }

    #[tokio::test]
    async fn cancellation_closes_connection_and_ends_run() {
        let (consumer, tx, log) = consumer_with_queues(&["cmd"]);
        let cancel = CancellationToken::new();
        let run = tokio::spawn(consumer.run(cancel.clone()));

        tx.send(BrokerEvent::ConnectionOpened).await.unwrap();
        cancel.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(log.count("close"), 1);
    }

    #[tokio::test]
    async fn run_ends_when_connection_closes_unexpectedly() {
        let (consumer, tx, log) = consumer_with_queues(&["cmd"]);
        let cancel = CancellationToken::new();
        let run = tokio::spawn(consumer.run(cancel));

        tx.send(BrokerEvent::ConnectionOpened).await.unwrap();
        tx.send(BrokerEvent::ConnectionClosed {
            reason: "broker restarted".to_string(),
        })
        .await
        .unwrap();
        run.await.unwrap().unwrap();

        // Closed before stop was ever requested: no close request issued
        assert_eq!(log.count("close"), 0);
    }
}
