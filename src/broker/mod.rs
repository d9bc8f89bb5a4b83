//! Broker consumer subsystem
//!
//! Owns one connection to the message broker, one channel on that
//! connection, and a fixed set of named queues. The connection lifecycle
//! is an explicit state machine driven by completion events:
//!
//! ```text
//! Init → Connecting → Connected → ChannelOpening → ChannelOpen
//!      → Declaring(k of N) → Consuming → Closing → Closed
//! ```
//!
//! Consumption starts only once every declared queue has confirmed.
//! Connection loss is terminal; there is no reconnect.

pub mod consumer;
pub mod transport;

pub use consumer::{BrokerConsumer, BrokerEvent, ConsumerState, MessageHandler, NoopMessageHandler};
pub use transport::{BrokerError, BrokerTransport, MqttTransport};
