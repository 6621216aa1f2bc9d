//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the Prometheus exporter with configured duration buckets
//! - Implement the [`Meter`] boundary on the `metrics` facade
//!
//! # Metrics
//! - `message.consumer.duration` (histogram, seconds)
//! - `message.producer.duration` (histogram, seconds)
//!
//! Prometheus renders both with `_` separators.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics::{Label, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use opentelemetry::KeyValue;

use crate::error::Error;
use crate::telemetry::{Histogram, HistogramSpec, Meter};

/// Name prefix shared by every messaging histogram.
pub const MESSAGE_METRIC_PREFIX: &str = "message";

/// Exporter builder with `buckets` applied to every messaging histogram.
pub fn exporter_builder(buckets: &[f64]) -> Result<PrometheusBuilder, Error> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Prefix(MESSAGE_METRIC_PREFIX.to_string()), buckets)
        .map_err(|e| Error::Metrics(e.to_string()))
}

/// Install the global recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr, buckets: &[f64]) -> Result<(), Error> {
    exporter_builder(buckets)?
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::Metrics(e.to_string()))?;

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// [`Meter`] backed by whatever recorder the `metrics` facade has installed.
///
/// Bucket boundaries are owned by the exporter, so `HistogramSpec::boundaries`
/// is not used here.
#[derive(Debug, Clone, Default)]
pub struct PrometheusMeter;

impl PrometheusMeter {
    pub fn new() -> Self {
        Self
    }
}

impl Meter for PrometheusMeter {
    fn f64_histogram(&self, spec: HistogramSpec) -> Arc<dyn Histogram> {
        let description = spec.description.clone();
        match spec.unit.as_str() {
            "s" => metrics::describe_histogram!(spec.name.clone(), Unit::Seconds, description),
            "ms" => metrics::describe_histogram!(spec.name.clone(), Unit::Milliseconds, description),
            _ => metrics::describe_histogram!(spec.name.clone(), description),
        }
        Arc::new(MetricsHistogram { name: spec.name })
    }
}

struct MetricsHistogram {
    name: String,
}

fn to_labels(attributes: &[KeyValue]) -> Vec<Label> {
    attributes
        .iter()
        .map(|kv| Label::new(kv.key.as_str().to_string(), kv.value.as_str().into_owned()))
        .collect()
}

impl Histogram for MetricsHistogram {
    fn record(&self, value: f64, attributes: &[KeyValue]) {
        metrics::histogram!(self.name.clone(), to_labels(attributes)).record(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{MetricsRecorder, CONSUMER_DURATION};
    use std::time::Duration;

    #[test]
    fn test_records_through_installed_recorder() {
        let recorder = exporter_builder(&[0.1, 1.0]).unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let durations = MetricsRecorder::consumer(&PrometheusMeter::new(), &[]);
            durations.record(
                Duration::from_millis(50),
                &[KeyValue::new("operation.name", "receive events")],
            );
        });

        let rendered = handle.render();
        assert!(rendered.contains(&CONSUMER_DURATION.replace('.', "_")));
        assert!(rendered.contains("receive events"));
    }

    #[test]
    fn test_rejects_empty_buckets() {
        assert!(matches!(exporter_builder(&[]), Err(Error::Metrics(_))));
    }
}
