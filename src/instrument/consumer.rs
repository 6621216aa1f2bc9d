//! Consumer span lifecycle.
//!
//! # Responsibilities
//! - Open a `receive <topic>` span for every polled message
//! - Close it on the next poll or on close, exactly once
//! - Record `message.consumer.duration` when the span closes
//!
//! # Design Decisions
//! - The consumer span is a new root linked to the producer's context, not
//!   its child: processing can outlive the producer's trace by hours
//! - The pending slot is guarded by a mutex that is never held across an
//!   await, so `close` can race an in-flight `poll` safely

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::KeyValue;

use crate::broker::{BrokerError, ConsumerClient, Event, Message};
use crate::instrument::attributes::{self, MESSAGING_DESTINATION_PARTITION_ID};
use crate::instrument::{MetricsRecorder, WrapOptions};
use crate::propagation;
use crate::telemetry::{Span, SpanKind, SpanStart, Telemetry, Tracer};

struct PendingSpan {
    span: Box<dyn Span>,
    started: Instant,
    metric_attributes: Vec<KeyValue>,
}

impl PendingSpan {
    fn finish(self, recorder: &MetricsRecorder) {
        self.span.end();
        recorder.record(self.started.elapsed(), &self.metric_attributes);
    }
}

#[derive(Default)]
struct Slot {
    pending: Option<PendingSpan>,
    closed: bool,
}

/// Consumer wrapper that traces every received message.
pub struct TracingConsumer<C> {
    inner: C,
    tracer: Arc<dyn Tracer>,
    recorder: MetricsRecorder,
    options: WrapOptions,
    slot: Mutex<Slot>,
}

impl<C: ConsumerClient> TracingConsumer<C> {
    pub fn new(inner: C, telemetry: &Telemetry, options: WrapOptions) -> Self {
        let recorder = MetricsRecorder::consumer(telemetry.meter.as_ref(), &options.histogram_buckets);
        Self {
            inner,
            tracer: telemetry.tracer.clone(),
            recorder,
            options,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Whether a message span is currently open.
    pub fn has_pending_span(&self) -> bool {
        self.lock().pending.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn end_pending(&self) {
        let mut slot = self.lock();
        if let Some(pending) = slot.pending.take() {
            pending.finish(&self.recorder);
        }
    }

    fn start_span(&self, message: &mut Message) {
        let extracted = propagation::extract(message);
        let name = attributes::receive_span_name(&message.topic);

        let mut start = SpanStart::new(name.clone(), SpanKind::Consumer).with_attributes(
            attributes::consumer_attributes(
                message,
                &self.options.messaging_system,
                &self.options.span_attributes,
            ),
        );
        start = start.with_attributes(attributes::baggage_attributes(
            &extracted.baggage,
            &self.options.baggage_keys,
        ));
        if extracted.is_valid() {
            start = start.with_link(extracted.clone());
        }

        let started = Instant::now();
        let span = self.tracer.start_span(start);
        let cx = span.context().with_baggage(extracted.baggage);
        propagation::inject(&cx, message);

        let mut metric_attributes =
            attributes::duration_attributes(&name, &self.options.messaging_system, &message.topic);
        if let Some(partition) = message.partition {
            metric_attributes.push(KeyValue::new(
                MESSAGING_DESTINATION_PARTITION_ID,
                partition.to_string(),
            ));
        }

        let pending = PendingSpan {
            span,
            started,
            metric_attributes,
        };

        let mut slot = self.lock();
        if slot.closed {
            pending.finish(&self.recorder);
            return;
        }
        if let Some(previous) = slot.pending.replace(pending) {
            previous.finish(&self.recorder);
        }
    }
}

#[async_trait]
impl<C: ConsumerClient> ConsumerClient for TracingConsumer<C> {
    async fn poll(&self, timeout: Duration) -> Option<Event> {
        self.end_pending();

        let mut event = self.inner.poll(timeout).await;
        if let Some(Event::Message(message)) = event.as_mut() {
            self.start_span(message);
        }
        event
    }

    async fn close(&self) -> Result<(), BrokerError> {
        {
            let mut slot = self.lock();
            slot.closed = true;
            if let Some(pending) = slot.pending.take() {
                pending.finish(&self.recorder);
            }
        }
        self.inner.close().await
    }
}
