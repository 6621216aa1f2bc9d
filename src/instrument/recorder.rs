//! Duration histograms for messaging operations.
//!
//! # Design Decisions
//! - The instrument is registered once, when the wrapper is built
//! - Recording never fails the caller: negative durations are clamped and a
//!   panicking backend is caught and logged

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;

use crate::telemetry::{Histogram, HistogramSpec, Meter};

/// Consumer-side duration: poll return until the next poll or close.
pub const CONSUMER_DURATION: &str = "message.consumer.duration";

/// Producer-side duration: produce call until the delivery report.
pub const PRODUCER_DURATION: &str = "message.producer.duration";

/// Records one duration histogram in seconds.
#[derive(Clone)]
pub struct MetricsRecorder {
    name: &'static str,
    histogram: Arc<dyn Histogram>,
}

impl MetricsRecorder {
    pub fn new(meter: &dyn Meter, name: &'static str, description: &str, buckets: &[f64]) -> Self {
        let spec = HistogramSpec::new(name)
            .with_unit("s")
            .with_description(description)
            .with_boundaries(buckets.to_vec());
        Self {
            name,
            histogram: meter.f64_histogram(spec),
        }
    }

    pub fn consumer(meter: &dyn Meter, buckets: &[f64]) -> Self {
        Self::new(
            meter,
            CONSUMER_DURATION,
            "Measures the duration of message consumption",
            buckets,
        )
    }

    pub fn producer(meter: &dyn Meter, buckets: &[f64]) -> Self {
        Self::new(
            meter,
            PRODUCER_DURATION,
            "Measures the duration of message production",
            buckets,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record `elapsed` in seconds.
    pub fn record(&self, elapsed: Duration, attributes: &[KeyValue]) {
        self.record_seconds(elapsed.as_secs_f64(), attributes);
    }

    /// Record a raw value. Negative or non-finite values are recorded as zero.
    pub fn record_seconds(&self, seconds: f64, attributes: &[KeyValue]) {
        let value = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let histogram = &self.histogram;
        let result = catch_unwind(AssertUnwindSafe(|| histogram.record(value, attributes)));
        if result.is_err() {
            tracing::warn!(instrument = self.name, "Metric recording failed");
        }
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
