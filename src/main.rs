//! broker-otel demo
//!
//! Runs an instrumented producer and consumer against the in-process broker.
//!
//! ```text
//!   Producer::send ──▶ TracingProducer ──▶ MemoryBroker ──▶ TracingConsumer ──▶ handler
//!        │                   │                                   │                 │
//!        │             send <topic> span                  receive <topic> span   retry
//!        │             producer duration                  consumer duration
//!        └──── traceparent / baggage headers ────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tokio::sync::Notify;

use broker_otel::broker::memory::MemoryBroker;
use broker_otel::broker::Message;
use broker_otel::client::{Consumer, HandlerError, Producer};
use broker_otel::config::{load_config, AppConfig};
use broker_otel::lifecycle::signals;
use broker_otel::observability::{logging, metrics, sdk};
use broker_otel::propagation::TraceContext;
use broker_otel::telemetry::otel::OtelTracer;
use broker_otel::{Telemetry, WrapOptions};

#[derive(Debug, Parser)]
#[command(name = "broker-otel", version, about = "Traced message broker demo")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of messages to publish before shutting down.
    #[arg(long, default_value_t = 10)]
    messages: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init(&config.observability.log_level)?;
    tracing::info!("broker-otel v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bootstrap_servers = %config.broker.bootstrap_servers,
        group_id = %config.broker.group_id,
        topics = ?config.broker.topics,
        "Configuration loaded"
    );
    tracing::debug!(
        producer = ?config.producer.client_properties(&config.broker),
        consumer = ?config.consumer.client_properties(&config.broker),
        "Client properties"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr, &config.observability.histogram_buckets)?;
    }

    let sdk_guard = sdk::init(&config.observability);
    let telemetry = Telemetry::new(
        Arc::new(OtelTracer::new(opentelemetry::global::tracer("broker-otel"))),
        Arc::new(metrics::PrometheusMeter::new()),
    );
    let options = WrapOptions::from_config(&config.broker, &config.observability);
    let broker = MemoryBroker::new();

    let producer = if config.producer.enable_tracing {
        Producer::traced(broker.producer(), &telemetry, options.clone())
    } else {
        Producer::new(broker.producer())
    };
    producer.start();

    let received = Arc::new(AtomicU32::new(0));
    let done = Arc::new(Notify::new());
    let expected = args.messages;

    let handler = {
        let received = received.clone();
        let done = done.clone();
        move |message: Message| {
            let received = received.clone();
            let done = done.clone();
            async move {
                let count = received.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(
                    topic = %message.topic,
                    offset = ?message.offset,
                    key = %message.key_str(),
                    "Consumed message"
                );
                if count >= expected {
                    done.notify_one();
                }
                Ok::<(), HandlerError>(())
            }
        }
    };

    let mut builder = Consumer::builder(
        broker.consumer(&config.broker.topics, config.broker.offset_reset),
    )
    .poll_timeout(config.consumer.poll_timeout())
    .retry(config.retry.clone())
    .message_handler(handler)
    .error_handler(|err| tracing::error!(error = %err, "Consumer error"));
    if config.consumer.enable_tracing {
        builder = builder.tracing(&telemetry, options);
    }
    let consumer = builder.build();
    consumer.start()?;

    let topic = config
        .broker
        .topics
        .first()
        .ok_or("no topics configured")?
        .clone();
    for i in 0..args.messages {
        let delivered = producer
            .send(
                &TraceContext::empty(),
                &topic,
                &format!("movie-{i}"),
                &json!({ "id": i, "title": format!("Movie {i}") }),
            )
            .await?;
        tracing::debug!(offset = ?delivered.offset, "Published");
    }

    if expected > 0 {
        tokio::select! {
            _ = done.notified() => tracing::info!(count = expected, "All messages consumed"),
            _ = signals::wait_for_signal() => {}
        }
    }

    consumer.stop().await?;
    producer.stop().await;
    sdk_guard.shutdown()?;

    tracing::info!("Shutdown complete");
    Ok(())
}
