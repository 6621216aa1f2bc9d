//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check retry policy invariants (initial ≤ max, multiplier > 1)
//! - Validate value ranges (timeouts > 0, buckets increasing)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: AppConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{AppConfig, RetryConfig};
use crate::propagation::Baggage;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("retry.initial_interval_ms ({initial}) exceeds retry.max_interval_ms ({max})")]
    IntervalOrder { initial: u64, max: u64 },

    #[error("retry.multiplier must be greater than 1 (got {0})")]
    Multiplier(f64),

    #[error("observability.histogram_buckets must be finite and strictly increasing")]
    Buckets,

    #[error("invalid observability.metrics_address '{0}'")]
    MetricsAddress(String),

    #[error("observability.baggage_span_attributes has invalid baggage key '{0}'")]
    BaggageKey(String),
}

/// Check the retry policy invariants.
pub fn validate_retry(retry: &RetryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_retry(retry, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_retry(retry: &RetryConfig, errors: &mut Vec<ValidationError>) {
    if retry.initial_interval_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "retry.initial_interval_ms",
        });
    }
    if retry.initial_interval_ms > retry.max_interval_ms {
        errors.push(ValidationError::IntervalOrder {
            initial: retry.initial_interval_ms,
            max: retry.max_interval_ms,
        });
    }
    if !(retry.multiplier > 1.0 && retry.multiplier.is_finite()) {
        errors.push(ValidationError::Multiplier(retry.multiplier));
    }
    if retry.timeout_ms == Some(0) {
        errors.push(ValidationError::Zero {
            field: "retry.timeout_ms",
        });
    }
}

/// Validate a whole configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.broker.bootstrap_servers.trim().is_empty() {
        errors.push(ValidationError::Empty {
            field: "broker.bootstrap_servers",
        });
    }
    if config.broker.topics.iter().all(|t| t.trim().is_empty()) {
        errors.push(ValidationError::Empty {
            field: "broker.topics",
        });
    }
    if config.consumer.poll_timeout_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "consumer.poll_timeout_ms",
        });
    }

    check_retry(&config.retry, &mut errors);

    let buckets = &config.observability.histogram_buckets;
    if buckets.is_empty()
        || buckets.iter().any(|b| !b.is_finite())
        || buckets.windows(2).any(|w| w[0] >= w[1])
    {
        errors.push(ValidationError::Buckets);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.observability.messaging_system.trim().is_empty() {
        errors.push(ValidationError::Empty {
            field: "observability.messaging_system",
        });
    }

    if config.observability.tracing_enabled && config.observability.service_name.trim().is_empty() {
        errors.push(ValidationError::Empty {
            field: "observability.service_name",
        });
    }
    for key in &config.observability.baggage_span_attributes {
        if !Baggage::is_valid_key(key) {
            errors.push(ValidationError::BaggageKey(key.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = AppConfig::default();
        config.retry.initial_interval_ms = 10_000;
        config.retry.max_interval_ms = 100;
        config.retry.multiplier = 1.0;
        config.observability.histogram_buckets = vec![1.0, 0.5];
        config.observability.metrics_address = "nope".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::IntervalOrder {
            initial: 10_000,
            max: 100
        }));
        assert!(errors.contains(&ValidationError::Multiplier(1.0)));
        assert!(errors.contains(&ValidationError::Buckets));
    }

    #[test]
    fn test_rejects_invalid_baggage_keys() {
        let mut config = AppConfig::default();
        config.observability.baggage_span_attributes = vec!["tenant".into(), "bad key".into()];
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::BaggageKey("bad key".into())])
        );
    }

    #[test]
    fn test_retry_zero_interval() {
        let retry = RetryConfig {
            initial_interval_ms: 0,
            ..RetryConfig::default()
        };
        assert_eq!(
            validate_retry(&retry),
            Err(vec![ValidationError::Zero {
                field: "retry.initial_interval_ms"
            }])
        );
    }
}
