//! JSON producer helper.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::broker::{BrokerError, Event, Message, ProducerClient};
use crate::error::Error;
use crate::instrument::{TracingProducer, WrapOptions};
use crate::propagation::{self, TraceContext};
use crate::telemetry::Telemetry;

/// How long `stop` waits for outstanding deliveries.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes JSON payloads and waits for their delivery reports.
pub struct Producer {
    client: Arc<dyn ProducerClient>,
    events_task: Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    pub fn new(client: impl ProducerClient + 'static) -> Self {
        Self {
            client: Arc::new(client),
            events_task: Mutex::new(None),
        }
    }

    /// Producer whose every message gets a `send <topic>` span.
    pub fn traced(
        client: impl ProducerClient + 'static,
        telemetry: &Telemetry,
        options: WrapOptions,
    ) -> Self {
        Self::new(TracingProducer::new(client, telemetry, options))
    }

    /// Serialize `value` and publish it to `topic` under `key`, as a child
    /// of `cx`. Resolves once the broker has acknowledged delivery.
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        cx: &TraceContext,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<Message, Error> {
        let payload = serde_json::to_vec(value)?;
        let mut message = Message::new(topic, payload).with_key(key);
        if cx.is_valid() {
            propagation::inject(cx, &mut message);
        }

        let (tx, rx) = oneshot::channel();
        self.client.produce(message, Some(tx)).await?;
        let report = rx.await.map_err(|_| BrokerError::DeliveryLost)?;
        let delivered = report.into_result()?;

        tracing::debug!(
            topic,
            partition = ?delivered.partition,
            offset = ?delivered.offset,
            "Message delivered"
        );
        Ok(delivered)
    }

    /// Spawn a task that logs the client's default events: fire-and-forget
    /// delivery reports and broker errors. No-op when already started.
    pub fn start(&self) {
        let mut task = lock(&self.events_task);
        if task.is_some() {
            return;
        }
        let Some(mut events) = self.client.events() else {
            tracing::warn!("Producer events channel already taken");
            return;
        };

        *task = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    Event::Delivery(report) => match report.error() {
                        Some(err) => tracing::warn!(
                            topic = %report.message().topic,
                            error = %err,
                            "Delivery failed"
                        ),
                        None => tracing::debug!(
                            topic = %report.message().topic,
                            offset = ?report.message().offset,
                            "Delivered"
                        ),
                    },
                    Event::Error(err) => tracing::error!(error = %err, "Producer error"),
                    other => tracing::debug!(event = ?other, "Producer event"),
                }
            }
        }));
    }

    /// Flush outstanding deliveries, then close the client.
    pub async fn stop(&self) {
        let remaining = self.client.flush(FLUSH_TIMEOUT).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Producer closed with undelivered messages");
        }
        self.client.close().await;

        if let Some(task) = lock(&self.events_task).take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;

    #[derive(Serialize)]
    struct Rating {
        movie_id: u32,
        score: u8,
    }

    #[tokio::test]
    async fn test_send_returns_delivered_message() {
        let broker = MemoryBroker::new();
        let producer = Producer::new(broker.producer());

        let delivered = producer
            .send(&TraceContext::empty(), "ratings", "m-1", &Rating { movie_id: 1, score: 4 })
            .await
            .unwrap();

        assert_eq!(delivered.offset, Some(0));
        assert_eq!(delivered.key, b"m-1");
        assert_eq!(delivered.value, br#"{"movie_id":1,"score":4}"#);
        assert!(delivered.headers.get(propagation::TRACEPARENT_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_send_surfaces_delivery_error() {
        let broker = MemoryBroker::new();
        broker.fail_next_delivery(BrokerError::AllBrokersDown);
        let producer = Producer::new(broker.producer());

        let err = producer
            .send(&TraceContext::empty(), "ratings", "k", &"x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Broker(BrokerError::AllBrokersDown)));
    }

    #[tokio::test]
    async fn test_stop_closes_client() {
        let broker = MemoryBroker::new();
        let producer = Producer::new(broker.producer());
        producer.start();
        producer.stop().await;

        let err = producer
            .send(&TraceContext::empty(), "ratings", "k", &1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Broker(BrokerError::Closed)));
    }
}
