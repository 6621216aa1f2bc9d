//! Consumer poll loop and handler dispatch.
//!
//! # Responsibilities
//! - Poll the broker on a single task until stopped
//! - Route messages, broker errors and notices to their handlers
//! - Keep the loop alive across handler errors and panics
//!
//! # Design Decisions
//! - The poll itself is never cancelled; stop latency is bounded by the
//!   poll timeout
//! - Handlers run inline on the poll task, so message N's span closes once
//!   its handler has returned and the next poll starts

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::broker::{BrokerError, ConsumerClient, Event, Message};
use crate::config::RetryConfig;
use crate::error::Error;
use crate::instrument::{TracingConsumer, WrapOptions};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::resilience::retry;
use crate::telemetry::Telemetry;

/// Error returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Called with broker-level errors (connection loss, broker down).
pub type ErrorHandler = Arc<dyn Fn(BrokerError) + Send + Sync>;

/// Called with every event that is neither a message nor an error.
pub type NoticeHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// Processes one consumed message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self)(message).await
    }
}

/// A message handler re-run with exponential backoff on failure.
pub struct Retrying {
    inner: Arc<dyn MessageHandler>,
    config: RetryConfig,
    signal: ShutdownSignal,
}

/// Wrap `handler` so failures are retried per `config`. Backoff waits end
/// early once `signal` fires.
pub fn with_retry(
    handler: impl MessageHandler + 'static,
    config: RetryConfig,
    signal: ShutdownSignal,
) -> Retrying {
    Retrying {
        inner: Arc::new(handler),
        config,
        signal,
    }
}

#[async_trait]
impl MessageHandler for Retrying {
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        let inner: &dyn MessageHandler = self.inner.as_ref();
        retry(&self.config, &self.signal, move || inner.handle(message.clone())).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Handlers {
    message: Arc<dyn MessageHandler>,
    error: ErrorHandler,
    notice: NoticeHandler,
}

impl Handlers {
    async fn dispatch(&self, event: Event) {
        match event {
            Event::Message(message) => {
                let topic = message.topic.clone();
                let offset = message.offset;
                let outcome = AssertUnwindSafe(self.message.handle(message))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::warn!(%topic, ?offset, error = %err, "Message handler failed");
                    }
                    Err(payload) => {
                        tracing::error!(
                            %topic,
                            ?offset,
                            panic = %panic_message(&*payload),
                            "Message handler panicked"
                        );
                    }
                }
            }
            Event::Error(err) => {
                tracing::error!(error = %err, "Broker error");
                let handler = &self.error;
                if let Err(payload) =
                    std::panic::catch_unwind(AssertUnwindSafe(|| handler(err)))
                {
                    tracing::error!(panic = %panic_message(&*payload), "Error handler panicked");
                }
            }
            other => {
                let handler = &self.notice;
                if let Err(payload) =
                    std::panic::catch_unwind(AssertUnwindSafe(|| handler(other)))
                {
                    tracing::error!(panic = %panic_message(&*payload), "Notice handler panicked");
                }
            }
        }
    }
}

/// Builder for [`Consumer`].
pub struct ConsumerBuilder {
    client: Arc<dyn ConsumerClient>,
    poll_timeout: Duration,
    message: Option<Arc<dyn MessageHandler>>,
    error: Option<ErrorHandler>,
    notice: Option<NoticeHandler>,
    retry: Option<RetryConfig>,
    shutdown: Shutdown,
}

impl ConsumerBuilder {
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn message_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.message = Some(Arc::new(handler));
        self
    }

    pub fn error_handler(mut self, handler: impl Fn(BrokerError) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(handler));
        self
    }

    pub fn notice_handler(mut self, handler: impl Fn(Event) + Send + Sync + 'static) -> Self {
        self.notice = Some(Arc::new(handler));
        self
    }

    /// Retry the message handler per `config`, cancelled by [`Consumer::stop`].
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Trace every consumed message.
    pub fn tracing(mut self, telemetry: &Telemetry, options: WrapOptions) -> Self {
        self.client = Arc::new(TracingConsumer::new(self.client, telemetry, options));
        self
    }

    pub fn build(self) -> Consumer {
        let mut message = self.message.unwrap_or_else(|| {
            Arc::new(|_message: Message| async { Ok::<(), HandlerError>(()) })
        });
        if let Some(config) = self.retry {
            message = Arc::new(Retrying {
                inner: message,
                config,
                signal: self.shutdown.subscribe(),
            });
        }

        let handlers = Handlers {
            message,
            error: self.error.unwrap_or_else(|| Arc::new(|_: BrokerError| {})),
            notice: self.notice.unwrap_or_else(|| {
                Arc::new(|event: Event| tracing::debug!(?event, "Ignoring consumer event"))
            }),
        };

        Consumer {
            client: self.client,
            poll_timeout: self.poll_timeout,
            handlers: Arc::new(handlers),
            shutdown: self.shutdown,
            task: Mutex::new(None),
        }
    }
}

/// Runs a consumer's poll loop on a background task.
pub struct Consumer {
    client: Arc<dyn ConsumerClient>,
    poll_timeout: Duration,
    handlers: Arc<Handlers>,
    shutdown: Shutdown,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Consumer {
    pub fn builder(client: impl ConsumerClient + 'static) -> ConsumerBuilder {
        ConsumerBuilder {
            client: Arc::new(client),
            poll_timeout: Duration::from_secs(1),
            message: None,
            error: None,
            notice: None,
            retry: None,
            shutdown: Shutdown::new(),
        }
    }

    /// Signal that fires when [`Consumer::stop`] is called.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.subscribe()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Spawn the poll loop.
    pub fn start(&self) -> Result<(), Error> {
        let mut task = lock(&self.task);
        if task.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let client = self.client.clone();
        let handlers = self.handlers.clone();
        let signal = self.shutdown.subscribe();
        let poll_timeout = self.poll_timeout;

        *task = Some(tokio::spawn(async move {
            tracing::info!(poll_timeout_ms = poll_timeout.as_millis() as u64, "Consumer started");
            while !signal.is_triggered() {
                if let Some(event) = client.poll(poll_timeout).await {
                    handlers.dispatch(event).await;
                }
            }
            tracing::info!("Consumer loop stopped");
        }));
        Ok(())
    }

    /// Stop the poll loop, wait for it to exit, then close the client.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        self.shutdown.trigger();

        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Consumer task failed");
            }
        }

        let result = self.client.close().await;
        if let Err(err) = &result {
            tracing::error!(error = %err, "Failed to close consumer");
        }
        result
    }
}
