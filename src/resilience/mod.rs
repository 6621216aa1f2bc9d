//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Failing message handler:
//!     → retries.rs (re-run the operation, watch timeout and cancellation)
//!     → backoff.rs (deterministic delay between attempts)
//! ```
//!
//! # Design Decisions
//! - Backoff has no jitter; a config always yields the same schedule
//! - Broker-level reconnection is the broker client's job, not retried here

pub mod backoff;
pub mod retries;

pub use backoff::ExponentialBackoff;
pub use retries::retry;
