//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → sections handed to the consumer runner, producer and retry executor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, BrokerConfig, ConsumerConfig, ObservabilityConfig, OffsetReset, ProducerConfig,
    RetryConfig, TraceExporter, DEFAULT_DURATION_BUCKETS,
};
pub use validation::{validate_config, validate_retry, ValidationError};
