//! OpenTelemetry SDK setup.
//!
//! # Responsibilities
//! - Build the SDK tracer provider from `ObservabilityConfig`
//! - Install it and the W3C text-map propagator as process globals
//! - Flush and shut the provider down on exit
//!
//! # Design Decisions
//! - Library code never reads the globals; wrappers get their tracer
//!   through `Telemetry`, so only the binary calls [`init`]

use opentelemetry::global;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;

use crate::config::{ObservabilityConfig, TraceExporter};
use crate::error::Error;
use crate::propagation;

/// Keeps the installed tracer provider alive until [`SdkGuard::shutdown`].
pub struct SdkGuard {
    provider: Option<SdkTracerProvider>,
}

impl SdkGuard {
    /// Whether a tracer provider was installed.
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Export buffered spans and stop the provider.
    pub fn shutdown(self) -> Result<(), Error> {
        let Some(provider) = self.provider else {
            return Ok(());
        };
        provider
            .shutdown()
            .map_err(|err| Error::Telemetry(err.to_string()))?;
        tracing::debug!("OpenTelemetry tracer provider shut down");
        Ok(())
    }
}

/// Tracer provider for `config`, tagged with its service name.
pub fn build_tracer_provider(config: &ObservabilityConfig) -> SdkTracerProvider {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();
    let builder = SdkTracerProvider::builder().with_resource(resource);
    let builder = match config.trace_exporter {
        TraceExporter::Stdout => {
            builder.with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        }
        TraceExporter::None => builder,
    };
    builder.build()
}

/// Install the propagator and, when enabled, the tracer provider.
pub fn init(config: &ObservabilityConfig) -> SdkGuard {
    global::set_text_map_propagator(propagation::composite_propagator());

    if !config.tracing_enabled {
        tracing::info!("OpenTelemetry tracing disabled");
        return SdkGuard { provider: None };
    }

    let provider = build_tracer_provider(config);
    global::set_tracer_provider(provider.clone());
    tracing::info!(
        service = %config.service_name,
        exporter = ?config.trace_exporter,
        "OpenTelemetry tracer provider installed"
    );
    SdkGuard {
        provider: Some(provider),
    }
}
