use super::*;
use std::time::Duration;

#[tokio::test]
async fn triggered_should_resolve_after_trigger_from_clone() {
    let signal = ShutdownSignal::new();
    let waiter = signal.clone();
    let handle = tokio::spawn(async move { waiter.triggered().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());
    signal.trigger();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("waiter should wake")
        .expect("waiter task");
    assert!(signal.is_triggered());
}

#[tokio::test]
async fn triggered_should_return_immediately_when_already_set() {
    let signal = ShutdownSignal::new();
    signal.trigger();
    signal.trigger();

    tokio::time::timeout(Duration::from_millis(100), signal.triggered())
        .await
        .expect("already triggered");
}
