//! Lifecycle management.
//!
//! # Responsibilities
//! - Broadcast shutdown to the consumer loop and retry waits
//! - Turn OS signals into a shutdown trigger for the binary

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
