//! Broker client boundary.
//!
//! # Data Flow
//! ```text
//! Consume:
//!     ConsumerClient::poll(timeout)
//!         → Event::Message / Event::Error / Event::Notice
//!         → (instrument::TracingConsumer opens a span per message)
//!
//! Produce:
//!     ProducerClient::produce(message, Some(delivery_tx))
//!         → Ok(()) once enqueued, Err on synchronous failure
//!         → DeliveryReport later on delivery_tx (or events() if none)
//! ```
//!
//! # Design Decisions
//! - The broker is a collaborator: these traits only describe what the
//!   instrumentation layer needs from it
//! - One delivery report per produced message, carried on a oneshot channel
//! - Instrumented wrappers implement the same traits as the raw clients

pub mod memory;
pub mod message;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use message::{Header, Headers, Message};

/// Errors reported by the broker client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Local produce queue is full.
    #[error("local queue full")]
    QueueFull,

    /// Topic does not exist on the broker.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Message exceeds the broker's size limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// All brokers are unreachable.
    #[error("all brokers down")]
    AllBrokersDown,

    /// The broker dropped the delivery channel without sending a report.
    #[error("delivery report lost")]
    DeliveryLost,

    /// The client has been closed.
    #[error("client closed")]
    Closed,
}

impl BrokerError {
    /// Short machine-readable name, used as the `error.type` metric attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::QueueFull => "queue_full",
            BrokerError::UnknownTopic(_) => "unknown_topic",
            BrokerError::MessageTooLarge { .. } => "message_too_large",
            BrokerError::Transport(_) => "transport",
            BrokerError::AllBrokersDown => "all_brokers_down",
            BrokerError::DeliveryLost => "delivery_lost",
            BrokerError::Closed => "closed",
        }
    }
}

/// Outcome of a single produce attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    /// Message was persisted; partition and offset are set.
    Delivered(Message),
    /// Delivery failed after the message was enqueued.
    Failed { message: Message, error: BrokerError },
}

impl DeliveryReport {
    pub fn message(&self) -> &Message {
        match self {
            DeliveryReport::Delivered(message) => message,
            DeliveryReport::Failed { message, .. } => message,
        }
    }

    pub fn error(&self) -> Option<&BrokerError> {
        match self {
            DeliveryReport::Delivered(_) => None,
            DeliveryReport::Failed { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<Message, BrokerError> {
        match self {
            DeliveryReport::Delivered(message) => Ok(message),
            DeliveryReport::Failed { error, .. } => Err(error),
        }
    }
}

/// Anything the broker hands back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A consumed message.
    Message(Message),
    /// A delivery report on the default events channel.
    Delivery(DeliveryReport),
    /// A broker-level error (connection loss, broker down).
    Error(BrokerError),
    /// Informational event (rebalance, statistics).
    Notice(String),
}

/// Sender half handed to the broker for a single delivery report.
pub type DeliverySender = oneshot::Sender<DeliveryReport>;

/// Consumer side of the broker client.
#[async_trait]
pub trait ConsumerClient: Send + Sync {
    /// Wait up to `timeout` for the next event. `None` when nothing arrived.
    async fn poll(&self, timeout: Duration) -> Option<Event>;

    /// Close the consumer connection.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Producer side of the broker client.
#[async_trait]
pub trait ProducerClient: Send + Sync {
    /// Enqueue `message`. The delivery report goes to `delivery` when given,
    /// otherwise to the default events channel.
    async fn produce(
        &self,
        message: Message,
        delivery: Option<DeliverySender>,
    ) -> Result<(), BrokerError>;

    /// Take the default events channel. Returns `None` after the first call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<Event>>;

    /// Wait up to `timeout` for outstanding deliveries. Returns the number
    /// still in flight.
    async fn flush(&self, timeout: Duration) -> usize;

    /// Close the producer connection.
    async fn close(&self);
}

#[async_trait]
impl<T: ConsumerClient + ?Sized> ConsumerClient for std::sync::Arc<T> {
    async fn poll(&self, timeout: Duration) -> Option<Event> {
        (**self).poll(timeout).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        (**self).close().await
    }
}

#[async_trait]
impl<T: ProducerClient + ?Sized> ProducerClient for std::sync::Arc<T> {
    async fn produce(
        &self,
        message: Message,
        delivery: Option<DeliverySender>,
    ) -> Result<(), BrokerError> {
        (**self).produce(message, delivery).await
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        (**self).events()
    }

    async fn flush(&self, timeout: Duration) -> usize {
        (**self).flush(timeout).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}
