//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Broker connection and subscription.
    pub broker: BrokerConfig,

    /// Producer tuning.
    pub producer: ProducerConfig,

    /// Consumer poll loop.
    pub consumer: ConsumerConfig,

    /// Handler retry policy.
    pub retry: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Where the consumer starts when it has no committed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Comma-separated bootstrap servers (e.g., "localhost:9092").
    pub bootstrap_servers: String,

    /// Consumer group identifier.
    pub group_id: String,

    /// Topics to subscribe to.
    pub topics: Vec<String>,

    /// Start position without a committed offset.
    pub offset_reset: OffsetReset,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "broker-otel".to_string(),
            topics: vec!["events".to_string()],
            offset_reset: OffsetReset::Earliest,
        }
    }
}

/// Producer tuning. Zero / empty values keep the client defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Compression codec (none, gzip, snappy, lz4, zstd).
    pub compression_type: String,

    /// Maximum batch size in bytes.
    pub batch_size: u32,

    /// Maximum messages per batch.
    pub batch_messages: u32,

    /// Time to wait for a batch to fill, in milliseconds.
    pub linger_ms: u32,

    /// Enable producer spans.
    pub enable_tracing: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            compression_type: String::new(),
            batch_size: 0,
            batch_messages: 0,
            linger_ms: 0,
            enable_tracing: true,
        }
    }
}

impl ProducerConfig {
    /// Broker client properties: defaults overridden by non-zero fields.
    pub fn client_properties(&self, broker: &BrokerConfig) -> BTreeMap<String, String> {
        let mut props = BTreeMap::from([
            ("bootstrap.servers".to_string(), broker.bootstrap_servers.clone()),
            ("batch.num.messages".to_string(), "50".to_string()),
            ("batch.size".to_string(), "16384".to_string()),
            ("linger.ms".to_string(), "10".to_string()),
            ("compression.type".to_string(), "snappy".to_string()),
        ]);
        if self.batch_size != 0 {
            props.insert("batch.size".into(), self.batch_size.to_string());
        }
        if self.batch_messages != 0 {
            props.insert("batch.num.messages".into(), self.batch_messages.to_string());
        }
        if self.linger_ms != 0 {
            props.insert("linger.ms".into(), self.linger_ms.to_string());
        }
        if !self.compression_type.is_empty() {
            props.insert("compression.type".into(), self.compression_type.clone());
        }
        props
    }
}

/// Consumer poll loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Upper bound for a single poll, in milliseconds.
    pub poll_timeout_ms: u64,

    /// Enable consumer spans.
    pub enable_tracing: bool,
}

impl ConsumerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Client properties for a consumer of `broker`.
    pub fn client_properties(&self, broker: &BrokerConfig) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("bootstrap.servers".to_string(), broker.bootstrap_servers.clone()),
            ("group.id".to_string(), broker.group_id.clone()),
            ("auto.offset.reset".to_string(), broker.offset_reset.as_str().to_string()),
        ])
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            enable_tracing: true,
        }
    }
}

/// Exponential backoff retry policy.
///
/// Total attempts are `max_retries + 1`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First backoff interval in milliseconds.
    pub initial_interval_ms: u64,

    /// Cap for any single backoff interval in milliseconds.
    pub max_interval_ms: u64,

    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Optional overall budget in milliseconds, measured from the first attempt.
    pub timeout_ms: Option<u64>,
}

impl RetryConfig {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, max_retries: u32) -> Self {
        Self {
            initial_interval_ms: initial.as_millis() as u64,
            max_interval_ms: max.as_millis() as u64,
            multiplier,
            max_retries,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 100,
            max_interval_ms: 5000,
            multiplier: 2.0,
            max_retries: 3,
            timeout_ms: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Duration histogram bucket boundaries in seconds.
    pub histogram_buckets: Vec<f64>,

    /// Value of the `messaging.system` attribute.
    pub messaging_system: String,

    /// Install the OpenTelemetry SDK tracer provider.
    pub tracing_enabled: bool,

    /// `service.name` resource attribute of exported spans.
    pub service_name: String,

    /// Where finished spans go.
    pub trace_exporter: TraceExporter,

    /// Baggage members copied onto producer and consumer spans as attributes.
    pub baggage_span_attributes: Vec<String>,
}

/// Span exporter used by the SDK tracer provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceExporter {
    /// Spans are recorded and propagated but not exported.
    None,
    /// Pretty-printed to stdout.
    #[default]
    Stdout,
}

/// Messaging duration buckets, in seconds.
pub const DEFAULT_DURATION_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            histogram_buckets: DEFAULT_DURATION_BUCKETS.to_vec(),
            messaging_system: "kafka".to_string(),
            tracing_enabled: true,
            service_name: "broker-otel".to_string(),
            trace_exporter: TraceExporter::default(),
            baggage_span_attributes: Vec::new(),
        }
    }
}
