//! Tracing and metrics backend boundary.
//!
//! # Data Flow
//! ```text
//! instrument::TracingConsumer / TracingProducer
//!     → Tracer::start_span(SpanStart)  → Box<dyn Span>
//!     → Span::record_error / Span::end
//!     → Meter::f64_histogram (once, at construction) → Histogram::record
//!
//! Backends:
//!     → otel.rs    (OpenTelemetry API tracer + meter)
//!     → memory.rs  (in-process recorder for tests)
//!     → observability::metrics (Prometheus histograms via `metrics`)
//! ```
//!
//! # Design Decisions
//! - Backends are injected through `Telemetry`, never looked up globally
//! - `Span::end` consumes the span, so a span cannot be ended twice
//! - Backends swallow their own failures; nothing here returns `Result`

pub mod memory;
pub mod otel;

use std::sync::Arc;

pub use opentelemetry::KeyValue;

use crate::propagation::TraceContext;

/// Role of a span in a messaging exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Producer,
    Consumer,
}

/// Everything needed to start a span.
#[derive(Debug, Clone)]
pub struct SpanStart {
    pub name: String,
    pub kind: SpanKind,
    pub attributes: Vec<KeyValue>,
    /// Causal parent. `None` (or an invalid context) starts a new root.
    pub parent: Option<TraceContext>,
    /// Related spans that are not parents.
    pub links: Vec<TraceContext>,
}

impl SpanStart {
    pub fn new(name: impl Into<String>, kind: SpanKind) -> Self {
        Self {
            name: name.into(),
            kind,
            attributes: Vec::new(),
            parent: None,
            links: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_parent(mut self, parent: TraceContext) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_link(mut self, link: TraceContext) -> Self {
        self.links.push(link);
        self
    }
}

/// An open span. Dropping without calling `end` leaves closure to the backend.
pub trait Span: Send {
    /// Identity of this span, usable as a parent or link.
    fn context(&self) -> TraceContext;

    /// Record `err` on the span and mark its status as failed.
    fn record_error(&mut self, err: &dyn std::error::Error);

    /// Close the span.
    fn end(self: Box<Self>);
}

/// Starts spans.
pub trait Tracer: Send + Sync {
    fn start_span(&self, start: SpanStart) -> Box<dyn Span>;
}

/// Description of a histogram instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSpec {
    pub name: String,
    pub unit: String,
    pub description: String,
    /// Explicit bucket boundaries. Empty lets the backend choose.
    pub boundaries: Vec<f64>,
}

impl HistogramSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            description: String::new(),
            boundaries: Vec::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.boundaries = boundaries;
        self
    }
}

/// A registered histogram. Safe for concurrent recording.
pub trait Histogram: Send + Sync {
    fn record(&self, value: f64, attributes: &[KeyValue]);
}

/// Registers instruments.
pub trait Meter: Send + Sync {
    fn f64_histogram(&self, spec: HistogramSpec) -> Arc<dyn Histogram>;
}

/// Tracer and meter handed to instrumented wrappers at construction.
#[derive(Clone)]
pub struct Telemetry {
    pub tracer: Arc<dyn Tracer>,
    pub meter: Arc<dyn Meter>,
}

impl Telemetry {
    pub fn new(tracer: Arc<dyn Tracer>, meter: Arc<dyn Meter>) -> Self {
        Self { tracer, meter }
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}
