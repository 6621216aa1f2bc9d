//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use broker_otel::broker::memory::MemoryBroker;
use broker_otel::broker::{Message, ProducerClient};
use broker_otel::telemetry::memory::{InMemoryMeter, InMemoryTracer};
use broker_otel::telemetry::Telemetry;

/// In-process broker plus recording telemetry backends.
pub struct Harness {
    pub broker: MemoryBroker,
    pub tracer: InMemoryTracer,
    pub meter: InMemoryMeter,
    pub telemetry: Telemetry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_broker(MemoryBroker::new())
    }

    pub fn with_broker(broker: MemoryBroker) -> Self {
        let tracer = InMemoryTracer::new();
        let meter = InMemoryMeter::new();
        let telemetry = Telemetry::new(Arc::new(tracer.clone()), Arc::new(meter.clone()));
        Self {
            broker,
            tracer,
            meter,
            telemetry,
        }
    }

    pub fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|t| t.to_string()).collect()
    }

    /// Publish `count` plain messages to `topic` and wait for delivery.
    pub async fn seed(&self, topic: &str, count: usize) {
        let producer = self.broker.producer();
        for i in 0..count {
            producer
                .produce(
                    Message::new(topic, format!("payload-{i}")).with_key(format!("key-{i}")),
                    None,
                )
                .await
                .unwrap();
        }
        assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
