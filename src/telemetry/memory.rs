//! In-process tracing and metrics backend.
//!
//! Keeps every span and measurement in memory so span lifecycles and
//! histogram recordings can be asserted on without an exporter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use rand::Rng;

use crate::propagation::{SpanId, TraceContext, TraceId};
use crate::telemetry::{
    Histogram, HistogramSpec, KeyValue, Meter, Span, SpanKind, SpanStart, Tracer,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn find_attribute(attributes: &[KeyValue], key: &str) -> Option<String> {
    attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
}

/// Snapshot of one span.
#[derive(Debug, Clone)]
pub struct SpanRecord {
    pub name: String,
    pub kind: SpanKind,
    pub attributes: Vec<KeyValue>,
    pub parent: Option<TraceContext>,
    pub links: Vec<TraceContext>,
    pub context: TraceContext,
    pub started_at: Instant,
    pub ended_at: Option<Instant>,
    pub errors: Vec<String>,
}

impl SpanRecord {
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Attribute value rendered as a string.
    pub fn attribute(&self, key: &str) -> Option<String> {
        find_attribute(&self.attributes, key)
    }
}

/// Tracer that records spans in memory.
#[derive(Clone, Default)]
pub struct InMemoryTracer {
    spans: Arc<Mutex<Vec<SpanRecord>>>,
}

impl InMemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// All spans in start order.
    pub fn spans(&self) -> Vec<SpanRecord> {
        lock(&self.spans).clone()
    }

    pub fn started_count(&self) -> usize {
        lock(&self.spans).len()
    }

    pub fn ended_count(&self) -> usize {
        lock(&self.spans).iter().filter(|s| s.is_ended()).count()
    }

    pub fn open_count(&self) -> usize {
        self.started_count() - self.ended_count()
    }

    pub fn reset(&self) {
        lock(&self.spans).clear();
    }
}

impl Tracer for InMemoryTracer {
    fn start_span(&self, start: SpanStart) -> Box<dyn Span> {
        let mut rng = rand::thread_rng();
        let parent = start.parent.filter(TraceContext::is_valid);
        let (trace_id, sampled) = match &parent {
            Some(p) => (p.trace_id, p.sampled),
            None => (TraceId::from(rng.gen_range(1..=u128::MAX)), true),
        };
        let context = TraceContext::new(
            trace_id,
            SpanId::from(rng.gen_range(1..=u64::MAX)),
            sampled,
        );

        let mut spans = lock(&self.spans);
        let index = spans.len();
        spans.push(SpanRecord {
            name: start.name,
            kind: start.kind,
            attributes: start.attributes,
            parent,
            links: start.links,
            context: context.clone(),
            started_at: Instant::now(),
            ended_at: None,
            errors: Vec::new(),
        });

        Box::new(InMemorySpan {
            index,
            context,
            spans: self.spans.clone(),
        })
    }
}

struct InMemorySpan {
    index: usize,
    context: TraceContext,
    spans: Arc<Mutex<Vec<SpanRecord>>>,
}

impl Span for InMemorySpan {
    fn context(&self) -> TraceContext {
        self.context.clone()
    }

    fn record_error(&mut self, err: &dyn std::error::Error) {
        if let Some(record) = lock(&self.spans).get_mut(self.index) {
            record.errors.push(err.to_string());
        }
    }

    fn end(self: Box<Self>) {
        if let Some(record) = lock(&self.spans).get_mut(self.index) {
            record.ended_at = Some(Instant::now());
        }
    }
}

/// One histogram recording.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub instrument: String,
    pub value: f64,
    pub attributes: Vec<KeyValue>,
}

impl Measurement {
    pub fn attribute(&self, key: &str) -> Option<String> {
        find_attribute(&self.attributes, key)
    }
}

/// Meter that records measurements in memory.
#[derive(Clone, Default)]
pub struct InMemoryMeter {
    registered: Arc<Mutex<Vec<HistogramSpec>>>,
    measurements: Arc<Mutex<Vec<Measurement>>>,
}

impl InMemoryMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Specs of every histogram registered so far.
    pub fn registered(&self) -> Vec<HistogramSpec> {
        lock(&self.registered).clone()
    }

    /// Recordings made against the histogram called `name`.
    pub fn measurements(&self, name: &str) -> Vec<Measurement> {
        lock(&self.measurements)
            .iter()
            .filter(|m| m.instrument == name)
            .cloned()
            .collect()
    }

    pub fn reset(&self) {
        lock(&self.measurements).clear();
    }
}

impl Meter for InMemoryMeter {
    fn f64_histogram(&self, spec: HistogramSpec) -> Arc<dyn Histogram> {
        let name = spec.name.clone();
        lock(&self.registered).push(spec);
        Arc::new(InMemoryHistogram {
            name,
            measurements: self.measurements.clone(),
        })
    }
}

struct InMemoryHistogram {
    name: String,
    measurements: Arc<Mutex<Vec<Measurement>>>,
}

impl Histogram for InMemoryHistogram {
    fn record(&self, value: f64, attributes: &[KeyValue]) {
        lock(&self.measurements).push(Measurement {
            instrument: self.name.clone(),
            value,
            attributes: attributes.to_vec(),
        });
    }
}
