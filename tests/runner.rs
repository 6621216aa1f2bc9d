//! Consumer runner tests.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker_otel::broker::{BrokerError, Event, Message};
use broker_otel::client::{Consumer, HandlerError};
use broker_otel::config::{OffsetReset, RetryConfig};
use broker_otel::instrument::WrapOptions;

use common::{wait_until, Harness};

const POLL: Duration = Duration::from_millis(10);

#[tokio::test]
async fn test_panicking_handler_keeps_loop_alive() {
    let h = Harness::new();
    h.seed("events", 3).await;

    let handled = Arc::new(AtomicU32::new(0));
    let counter = handled.clone();
    let consumer = Consumer::builder(
        h.broker
            .consumer(&Harness::topics(&["events"]), OffsetReset::Earliest),
    )
    .poll_timeout(POLL)
    .message_handler(move |message: Message| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if message.offset == Some(0) {
                panic!("bad message");
            }
            Ok::<(), HandlerError>(())
        }
    })
    .tracing(&h.telemetry, WrapOptions::default())
    .build();

    consumer.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || handled.load(Ordering::SeqCst) == 3).await);
    assert!(consumer.is_running());

    consumer.stop().await.unwrap();
    assert!(!consumer.is_running());
    assert_eq!(h.tracer.started_count(), 3);
    assert_eq!(h.tracer.ended_count(), 3);
}

#[tokio::test]
async fn test_error_and_notice_handlers_invoked() {
    let h = Harness::new();
    h.broker.inject_event(Event::Error(BrokerError::Transport("reset by peer".into())));
    h.broker.inject_event(Event::Notice("rebalance".into()));

    let errors = Arc::new(Mutex::new(Vec::new()));
    let notices = Arc::new(Mutex::new(Vec::new()));
    let (err_log, notice_log) = (errors.clone(), notices.clone());

    let consumer = Consumer::builder(
        h.broker
            .consumer(&Harness::topics(&["events"]), OffsetReset::Earliest),
    )
    .poll_timeout(POLL)
    .error_handler(move |err| err_log.lock().unwrap().push(err))
    .notice_handler(move |event| notice_log.lock().unwrap().push(event))
    .build();

    consumer.start().unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            !errors.lock().unwrap().is_empty() && !notices.lock().unwrap().is_empty()
        })
        .await
    );
    consumer.stop().await.unwrap();

    assert_eq!(
        *errors.lock().unwrap(),
        vec![BrokerError::Transport("reset by peer".into())]
    );
    assert_eq!(*notices.lock().unwrap(), vec![Event::Notice("rebalance".into())]);
}

#[tokio::test]
async fn test_failing_handler_retried_then_dropped() {
    let h = Harness::new();
    h.seed("events", 2).await;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let consumer = Consumer::builder(
        h.broker
            .consumer(&Harness::topics(&["events"]), OffsetReset::Earliest),
    )
    .poll_timeout(POLL)
    .retry(RetryConfig::new(Duration::from_millis(1), Duration::from_millis(4), 2.0, 2))
    .message_handler(move |_message: Message| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), HandlerError>("store unavailable".into())
        }
    })
    .build();

    consumer.start().unwrap();
    // Two messages, three attempts each.
    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) == 6).await);
    consumer.stop().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_start_twice_rejected() {
    let h = Harness::new();
    let consumer = Consumer::builder(
        h.broker
            .consumer(&Harness::topics(&["events"]), OffsetReset::Earliest),
    )
    .poll_timeout(POLL)
    .build();

    consumer.start().unwrap();
    assert!(matches!(
        consumer.start(),
        Err(broker_otel::Error::AlreadyStarted)
    ));
    consumer.stop().await.unwrap();
}
