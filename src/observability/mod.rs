//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Library code:
//!     → tracing macros (structured log events)
//!     → telemetry::Meter (duration histograms)
//!
//! Process wiring:
//!     → logging.rs (subscriber with env filter + fmt layer)
//!     → metrics.rs (Prometheus exporter, Meter over the `metrics` facade)
//!     → sdk.rs (OpenTelemetry tracer provider + W3C propagator globals)
//! ```
//!
//! # Design Decisions
//! - Only the binary installs global subscribers and recorders
//! - Histogram buckets come from configuration, not hard-coded per metric

pub mod logging;
pub mod metrics;
pub mod sdk;
