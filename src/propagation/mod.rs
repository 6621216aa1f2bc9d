//! Trace context propagation across the broker.
//!
//! # Data Flow
//! ```text
//! Producer side:
//!     TraceContext → carrier::inject → message headers → broker
//!
//! Consumer side:
//!     broker → message headers → carrier::extract → TraceContext
//!            (absent / malformed headers → empty context, never an error)
//! ```

pub mod carrier;
pub mod context;

pub use carrier::{
    composite_propagator, extract, inject, BAGGAGE_HEADER, TRACEPARENT_HEADER, TRACESTATE_HEADER,
};
pub use context::{Baggage, SpanId, TraceContext, TraceId};
