//! Tracing and duration metrics for message-broker clients.
//!
//! Wraps broker consumers and producers so every consumed and produced
//! message gets a span and a duration measurement, carries W3C trace context
//! across the broker in message headers, and retries failing handlers with
//! deterministic exponential backoff.

// Broker boundary and wire context
pub mod broker;
pub mod propagation;

// Instrumentation
pub mod instrument;
pub mod telemetry;

// Application helpers
pub mod client;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use client::{Consumer, Producer};
pub use config::AppConfig;
pub use error::Error;
pub use instrument::{TracingConsumer, TracingProducer, WrapOptions};
pub use lifecycle::Shutdown;
pub use telemetry::Telemetry;
