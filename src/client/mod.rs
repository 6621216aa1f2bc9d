//! Application-facing consumer and producer helpers.
//!
//! # Data Flow
//! ```text
//! Consumer::start
//!     → poll loop on one task (optionally through TracingConsumer)
//!     → Event::Message → MessageHandler (optionally through Retrying)
//!     → Event::Error   → error handler
//!     → anything else  → notice handler
//!
//! Producer::send
//!     → serde_json payload + trace context in headers
//!     → ProducerClient::produce with a private delivery channel
//!     → delivered message or delivery error
//! ```

pub mod consumer;
pub mod producer;

pub use consumer::{
    with_retry, Consumer, ConsumerBuilder, ErrorHandler, HandlerError, MessageHandler,
    NoticeHandler, Retrying,
};
pub use producer::Producer;
