//! OpenTelemetry backend.
//!
//! # Responsibilities
//! - Adapt any `opentelemetry::trace::Tracer` to the `Tracer` boundary
//! - Adapt an `opentelemetry::metrics::Meter` to the `Meter` boundary
//!
//! # Design Decisions
//! - Consumer spans link to the extracted remote context instead of using it
//!   as parent; the adapter only maps what it is given
//! - Errors set the span status to `Error` in addition to recording an event

use std::sync::Arc;

use opentelemetry::metrics::Meter as OtelMeterHandle;
use opentelemetry::trace::{Link, SpanBuilder, Status, TraceContextExt};
use opentelemetry::Context;

use crate::propagation::carrier::{from_span_context, to_span_context};
use crate::propagation::TraceContext;
use crate::telemetry::{
    Histogram, HistogramSpec, KeyValue, Meter, Span, SpanKind, SpanStart, Tracer,
};

fn to_otel_kind(kind: SpanKind) -> opentelemetry::trace::SpanKind {
    match kind {
        SpanKind::Producer => opentelemetry::trace::SpanKind::Producer,
        SpanKind::Consumer => opentelemetry::trace::SpanKind::Consumer,
    }
}

/// `Tracer` backed by an OpenTelemetry tracer.
pub struct OtelTracer<T> {
    tracer: T,
}

impl<T> OtelTracer<T> {
    pub fn new(tracer: T) -> Self {
        Self { tracer }
    }
}

impl<T> Tracer for OtelTracer<T>
where
    T: opentelemetry::trace::Tracer + Send + Sync,
    T::Span: Send + 'static,
{
    fn start_span(&self, start: SpanStart) -> Box<dyn Span> {
        let links: Vec<Link> = start
            .links
            .iter()
            .filter(|cx| cx.is_valid())
            .map(|cx| Link::with_context(to_span_context(cx)))
            .collect();

        let builder = SpanBuilder::from_name(start.name)
            .with_kind(to_otel_kind(start.kind))
            .with_attributes(start.attributes)
            .with_links(links);

        let parent = match start.parent.as_ref().filter(|cx| cx.is_valid()) {
            Some(cx) => Context::new().with_remote_span_context(to_span_context(cx)),
            None => Context::new(),
        };

        Box::new(OtelSpan {
            span: self.tracer.build_with_context(builder, &parent),
        })
    }
}

struct OtelSpan<S> {
    span: S,
}

impl<S> Span for OtelSpan<S>
where
    S: opentelemetry::trace::Span + Send + 'static,
{
    fn context(&self) -> TraceContext {
        from_span_context(self.span.span_context())
    }

    fn record_error(&mut self, err: &dyn std::error::Error) {
        self.span.record_error(err);
        self.span.set_status(Status::error(err.to_string()));
    }

    fn end(mut self: Box<Self>) {
        self.span.end();
    }
}

/// `Meter` backed by an OpenTelemetry meter.
pub struct OtelMeter {
    meter: OtelMeterHandle,
}

impl OtelMeter {
    pub fn new(meter: OtelMeterHandle) -> Self {
        Self { meter }
    }
}

impl Meter for OtelMeter {
    fn f64_histogram(&self, spec: HistogramSpec) -> Arc<dyn Histogram> {
        let mut builder = self
            .meter
            .f64_histogram(spec.name)
            .with_unit(spec.unit)
            .with_description(spec.description);
        if !spec.boundaries.is_empty() {
            builder = builder.with_boundaries(spec.boundaries);
        }
        Arc::new(OtelHistogram {
            histogram: builder.build(),
        })
    }
}

struct OtelHistogram {
    histogram: opentelemetry::metrics::Histogram<f64>,
}

impl Histogram for OtelHistogram {
    fn record(&self, value: f64, attributes: &[KeyValue]) {
        self.histogram.record(value, attributes);
    }
}
