//! Tracing and metrics wrappers around broker clients.
//!
//! # Data Flow
//! ```text
//! Consume:
//!     TracingConsumer::poll
//!         → end the previous message's span, record its duration
//!         → inner poll
//!         → on a message: extract context, start `receive <topic>` root span
//!           linked to the producer (plus selected baggage as attributes),
//!           re-inject, keep span pending
//!
//! Produce:
//!     TracingProducer::produce
//!         → start `send <topic>` span (parent from headers), inject
//!         → inner produce with a private delivery channel
//!         → waiter task ends the span when the report arrives, forwards it
//! ```
//!
//! # Design Decisions
//! - Wrappers implement the same client traits as the raw clients
//! - At most one consumer span is open at a time; a mutex guards the slot
//! - Tracing and metrics failures never reach the caller

pub mod attributes;
pub mod consumer;
pub mod producer;
pub mod recorder;

use opentelemetry::KeyValue;

use crate::config::{BrokerConfig, ObservabilityConfig, DEFAULT_DURATION_BUCKETS};

pub use consumer::TracingConsumer;
pub use producer::TracingProducer;
pub use recorder::{MetricsRecorder, CONSUMER_DURATION, PRODUCER_DURATION};

/// Options shared by the consumer and producer wrappers.
#[derive(Debug, Clone)]
pub struct WrapOptions {
    /// Value of the `messaging.system` attribute.
    pub messaging_system: String,
    /// Extra attributes appended to every span.
    pub span_attributes: Vec<KeyValue>,
    /// Duration histogram bucket boundaries, in seconds.
    pub histogram_buckets: Vec<f64>,
    /// Baggage members copied onto spans as attributes.
    pub baggage_keys: Vec<String>,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            messaging_system: "kafka".to_string(),
            span_attributes: Vec::new(),
            histogram_buckets: DEFAULT_DURATION_BUCKETS.to_vec(),
            baggage_keys: Vec::new(),
        }
    }
}

impl WrapOptions {
    /// Options derived from configuration: system name and buckets from
    /// `observability`, connection attributes from `broker`.
    pub fn from_config(broker: &BrokerConfig, observability: &ObservabilityConfig) -> Self {
        Self {
            messaging_system: observability.messaging_system.clone(),
            span_attributes: attributes::broker_attributes(broker),
            histogram_buckets: observability.histogram_buckets.clone(),
            baggage_keys: observability.baggage_span_attributes.clone(),
        }
    }

    pub fn with_attribute(mut self, attribute: KeyValue) -> Self {
        self.span_attributes.push(attribute);
        self
    }

    /// Copy the baggage member `key` onto every span that carries it.
    pub fn with_baggage_key(mut self, key: impl Into<String>) -> Self {
        self.baggage_keys.push(key.into());
        self
    }
}
