//! Retry executor timing tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker_otel::config::RetryConfig;
use broker_otel::lifecycle::{Shutdown, ShutdownSignal};
use broker_otel::resilience::retry;
use tokio::time::Instant;

fn assert_offsets(actual: &[Duration], expected_ms: &[u64]) {
    assert_eq!(actual.len(), expected_ms.len(), "attempts: {actual:?}");
    for (got, want) in actual.iter().zip(expected_ms) {
        let want = Duration::from_millis(*want);
        let diff = if *got > want { *got - want } else { want - *got };
        assert!(diff <= Duration::from_millis(5), "got {got:?}, want {want:?}");
    }
}

fn policy() -> RetryConfig {
    RetryConfig::new(Duration::from_millis(100), Duration::from_secs(5), 2.0, 3)
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_operation_attempted_four_times() {
    let start = Instant::now();
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let log = attempts.clone();

    let result: Result<(), String> = retry(&policy(), &ShutdownSignal::never(), || {
        let mut log = log.lock().unwrap();
        log.push(start.elapsed());
        let n = log.len();
        async move { Err(format!("failure {n}")) }
    })
    .await;

    assert_eq!(result, Err("failure 4".to_string()));
    // Waits of 100ms, 200ms and 400ms between attempts.
    assert_offsets(&attempts.lock().unwrap(), &[0, 100, 300, 700]);
}

#[tokio::test(start_paused = true)]
async fn test_delays_capped_at_max_interval() {
    let start = Instant::now();
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let log = attempts.clone();
    let config = RetryConfig::new(Duration::from_millis(100), Duration::from_millis(150), 3.0, 3);

    let _: Result<(), &str> = retry(&config, &ShutdownSignal::never(), || {
        log.lock().unwrap().push(start.elapsed());
        async { Err("down") }
    })
    .await;

    assert_offsets(&attempts.lock().unwrap(), &[0, 100, 250, 400]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_backoff() {
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let attempts = Arc::new(Mutex::new(0u32));
    let count = attempts.clone();

    let task = tokio::spawn(async move {
        let config = RetryConfig::new(Duration::from_secs(10), Duration::from_secs(60), 2.0, 5);
        retry(&config, &signal, || {
            *count.lock().unwrap() += 1;
            async { Err::<(), _>("unavailable") }
        })
        .await
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    let cancelled_at = Instant::now();
    shutdown.trigger();

    let result = task.await.unwrap();
    assert_eq!(result, Err("unavailable"));
    assert_eq!(*attempts.lock().unwrap(), 1);
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
}
