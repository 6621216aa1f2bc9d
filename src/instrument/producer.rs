//! Producer span and delivery tracking.
//!
//! # Responsibilities
//! - Open a `send <topic>` span per produced message, parented on the
//!   caller's context
//! - Close it when the delivery report arrives, recording any delivery error
//! - Hand the report on unchanged: to the caller's channel when given,
//!   otherwise to this wrapper's default events channel
//!
//! # Design Decisions
//! - The broker always gets a private delivery channel so the waiter task
//!   owns span closure, including for fire-and-forget produces
//! - A synchronous produce failure ends the span inline; no waiter is spawned
//! - `flush` also waits for the waiters, so after it returns zero every span
//!   has ended and every report has been handed on

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout_at;

use crate::broker::{
    BrokerError, DeliveryReport, DeliverySender, Event, Message, ProducerClient,
};
use crate::instrument::attributes::{self, ERROR_TYPE};
use crate::instrument::{MetricsRecorder, WrapOptions};
use crate::propagation::{self, TraceContext};
use crate::telemetry::{Span, SpanKind, SpanStart, Telemetry, Tracer};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer wrapper that traces every produced message.
pub struct TracingProducer<P> {
    inner: P,
    tracer: Arc<dyn Tracer>,
    recorder: MetricsRecorder,
    options: WrapOptions,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    upstream: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    waiters: Arc<Waiters>,
}

/// Count of delivery waiters that have not finished yet.
#[derive(Default)]
struct Waiters {
    in_flight: AtomicUsize,
    drained: Notify,
}

impl Waiters {
    fn track(self: &Arc<Self>) -> WaiterGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        WaiterGuard(self.clone())
    }

    fn remaining(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    async fn wait_until(&self, deadline: tokio::time::Instant) -> usize {
        loop {
            let drained = self.drained.notified();
            let remaining = self.remaining();
            if remaining == 0 {
                return 0;
            }
            if timeout_at(deadline, drained).await.is_err() {
                return self.remaining();
            }
        }
    }
}

/// Marks one waiter finished when dropped, including on panic.
struct WaiterGuard(Arc<Waiters>);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

impl<P: ProducerClient> TracingProducer<P> {
    pub fn new(inner: P, telemetry: &Telemetry, options: WrapOptions) -> Self {
        let recorder =
            MetricsRecorder::producer(telemetry.meter.as_ref(), &options.histogram_buckets);
        let upstream = inner.events();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner,
            tracer: telemetry.tracer.clone(),
            recorder,
            options,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            upstream: Mutex::new(upstream),
            waiters: Arc::new(Waiters::default()),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Produce `message` as a child of `cx`.
    ///
    /// When `cx` is not a valid context, the parent is whatever context the
    /// message headers already carry (or none).
    pub async fn produce_with_context(
        &self,
        cx: &TraceContext,
        mut message: Message,
        delivery: Option<DeliverySender>,
    ) -> Result<(), BrokerError> {
        if cx.is_valid() {
            propagation::inject(cx, &mut message);
        }
        self.produce(message, delivery).await
    }

    fn start_span(&self, message: &mut Message) -> Box<dyn Span> {
        let parent = propagation::extract(message);
        let mut start = SpanStart::new(
            attributes::send_span_name(&message.topic),
            SpanKind::Producer,
        )
        .with_attributes(attributes::producer_attributes(
            message,
            &self.options.messaging_system,
            &self.options.span_attributes,
        ));
        start = start.with_attributes(attributes::baggage_attributes(
            &parent.baggage,
            &self.options.baggage_keys,
        ));
        let baggage = parent.baggage.clone();
        if parent.is_valid() {
            start = start.with_parent(parent);
        }

        let span = self.tracer.start_span(start);
        propagation::inject(&span.context().with_baggage(baggage), message);
        span
    }
}

/// Everything the delivery waiter needs to finish one produce.
struct InFlight {
    span: Box<dyn Span>,
    started: Instant,
    metric_attributes: Vec<KeyValue>,
    recorder: MetricsRecorder,
}

impl InFlight {
    fn finish(mut self, error: Option<&BrokerError>) {
        if let Some(err) = error {
            self.span.record_error(err);
            self.metric_attributes
                .push(KeyValue::new(ERROR_TYPE, err.kind()));
        }
        self.span.end();
        self.recorder
            .record(self.started.elapsed(), &self.metric_attributes);
    }
}

async fn await_delivery(
    _guard: WaiterGuard,
    in_flight: InFlight,
    rx: oneshot::Receiver<DeliveryReport>,
    fallback: Message,
    forward: Option<DeliverySender>,
    events_tx: mpsc::UnboundedSender<Event>,
) {
    let report = match rx.await {
        Ok(report) => report,
        Err(_) => {
            tracing::warn!(topic = %fallback.topic, "Delivery channel dropped without a report");
            DeliveryReport::Failed {
                message: fallback,
                error: BrokerError::DeliveryLost,
            }
        }
    };

    in_flight.finish(report.error());

    match forward {
        Some(tx) => {
            if tx.send(report).is_err() {
                tracing::debug!("Caller dropped its delivery channel");
            }
        }
        None => {
            if events_tx.send(Event::Delivery(report)).is_err() {
                tracing::debug!("Events channel closed, delivery report discarded");
            }
        }
    }
}

#[async_trait]
impl<P: ProducerClient> ProducerClient for TracingProducer<P> {
    async fn produce(
        &self,
        mut message: Message,
        delivery: Option<DeliverySender>,
    ) -> Result<(), BrokerError> {
        let span = self.start_span(&mut message);
        let name = attributes::send_span_name(&message.topic);
        let in_flight = InFlight {
            span,
            started: Instant::now(),
            metric_attributes: attributes::duration_attributes(
                &name,
                &self.options.messaging_system,
                &message.topic,
            ),
            recorder: self.recorder.clone(),
        };

        let (tx, rx) = oneshot::channel();
        let fallback = message.clone();
        if let Err(err) = self.inner.produce(message, Some(tx)).await {
            tracing::debug!(topic = %fallback.topic, error = %err, "Produce failed");
            in_flight.finish(Some(&err));
            return Err(err);
        }

        tokio::spawn(await_delivery(
            self.waiters.track(),
            in_flight,
            rx,
            fallback,
            delivery,
            self.events_tx.clone(),
        ));
        Ok(())
    }

    /// Default events channel: delivery reports for fire-and-forget
    /// produces plus everything the wrapped client emits.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        let rx = lock(&self.events_rx).take()?;
        if let Some(mut upstream) = lock(&self.upstream).take() {
            let tx = self.events_tx.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        while let Some(event) = upstream.recv().await {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(_) => {
                    tracing::warn!("No runtime, wrapped client events will not be forwarded");
                }
            }
        }
        Some(rx)
    }

    /// Flush the wrapped client, then wait for the delivery waiters within
    /// the same `timeout`. Returns how many produces are still unfinished.
    async fn flush(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        let inner = self.inner.flush(timeout).await;
        let waiting = self.waiters.wait_until(deadline).await;
        inner.max(waiting)
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::instrument::PRODUCER_DURATION;
    use crate::propagation::{SpanId, TraceId};
    use crate::telemetry::memory::{InMemoryMeter, InMemoryTracer};

    fn setup() -> (MemoryBroker, InMemoryTracer, InMemoryMeter, Telemetry) {
        let tracer = InMemoryTracer::new();
        let meter = InMemoryMeter::new();
        let telemetry = Telemetry::new(Arc::new(tracer.clone()), Arc::new(meter.clone()));
        (MemoryBroker::new(), tracer, meter, telemetry)
    }

    #[tokio::test]
    async fn test_span_ends_on_delivery_and_report_is_forwarded() {
        let (broker, tracer, meter, telemetry) = setup();
        let producer = TracingProducer::new(broker.producer(), &telemetry, WrapOptions::default());

        let (tx, rx) = oneshot::channel();
        producer
            .produce(Message::new("movies", "m1").with_key("k"), Some(tx))
            .await
            .unwrap();

        let delivered = rx.await.unwrap().into_result().unwrap();
        assert_eq!(delivered.offset, Some(0));

        // The waiter ends the span before forwarding.
        let span = &tracer.spans()[0];
        assert!(span.is_ended());
        assert_eq!(span.name, "send movies");
        assert_eq!(span.kind, SpanKind::Producer);
        assert!(span.errors.is_empty());
        assert_eq!(meter.measurements(PRODUCER_DURATION).len(), 1);

        let carried = propagation::extract(&delivered);
        assert_eq!(carried.span_id, span.context.span_id);
    }

    #[tokio::test]
    async fn test_explicit_context_becomes_parent() {
        let (broker, tracer, _meter, telemetry) = setup();
        let producer = TracingProducer::new(broker.producer(), &telemetry, WrapOptions::default());
        let cx = TraceContext::new(TraceId::from(7u128), SpanId::from(9u64), true);

        let (tx, rx) = oneshot::channel();
        producer
            .produce_with_context(&cx, Message::new("movies", "m1"), Some(tx))
            .await
            .unwrap();
        rx.await.unwrap();

        let span = &tracer.spans()[0];
        assert_eq!(span.parent.as_ref().map(|p| p.span_id), Some(cx.span_id));
        assert_eq!(span.context.trace_id, cx.trace_id);
    }

    #[tokio::test]
    async fn test_flush_waits_for_waiters() {
        let (broker, tracer, meter, telemetry) = setup();
        broker.set_delivery_delay(Duration::from_millis(20));
        let producer = TracingProducer::new(broker.producer(), &telemetry, WrapOptions::default());

        for i in 0..3 {
            producer
                .produce(Message::new("movies", format!("m{i}")), None)
                .await
                .unwrap();
        }

        assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
        assert_eq!(tracer.started_count(), 3);
        assert_eq!(tracer.ended_count(), 3);
        assert_eq!(meter.measurements(PRODUCER_DURATION).len(), 3);
    }

    #[tokio::test]
    async fn test_synchronous_failure_ends_span_inline() {
        let (broker, tracer, meter, telemetry) = setup();
        broker.fail_next_produce(BrokerError::QueueFull);
        let producer = TracingProducer::new(broker.producer(), &telemetry, WrapOptions::default());

        let err = producer
            .produce(Message::new("movies", "m1"), None)
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::QueueFull);

        let span = &tracer.spans()[0];
        assert!(span.is_ended());
        assert_eq!(span.errors, vec!["local queue full".to_string()]);

        let recorded = meter.measurements(PRODUCER_DURATION);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].attribute(ERROR_TYPE).as_deref(), Some("queue_full"));
    }
}
