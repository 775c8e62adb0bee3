//! Consumer host: concurrent loops, isolation, graceful stop.

use std::time::Duration;

use cnpj_messaging::bus::InMemoryBroker;
use cnpj_messaging::host::{ConsumerHost, LoopOutcome, Registration};
use cnpj_messaging::HandlerError;
use tokio_util::sync::CancellationToken;

use crate::support::{service, wait_until, Numbered};

#[tokio::test]
async fn loops_run_concurrently_and_in_isolation() {
    let broker = InMemoryBroker::new();
    for n in 1..=3 {
        broker.append_raw("a", Numbered::body(n));
        broker.append_raw("b", Numbered::body(n));
    }

    let handle = ConsumerHost::new(service(&broker))
        .register(Registration::new("a", "g", |_: Numbered, _| async {
            Err(HandlerError::rejected("loop a rejects everything"))
        }))
        .register(Registration::new("b", "g", |_: Numbered, _| async { Ok(()) }))
        .start()
        .unwrap();
    assert_eq!(handle.len(), 2);

    wait_until(|| {
        broker.len("a_Consume_Fail") == 3 && broker.committed_offsets("b", "g").len() == 3
    })
    .await;

    let report = handle.stop(Duration::from_secs(1)).await;
    assert!(report.all_stopped());
    assert_eq!(report.stats("a").map(|s| s.rejected), Some(3));
    assert_eq!(report.stats("b").map(|s| s.handled), Some(3));

    assert!(broker.committed_offsets("a", "g").is_empty());
    assert_eq!(broker.committed_offsets("b", "g"), vec![0, 1, 2]);
    assert_eq!(broker.consumer_sessions_closed(), 2);
}

#[tokio::test]
async fn stop_cancels_every_loop() {
    let broker = InMemoryBroker::new();
    let handle = ConsumerHost::new(service(&broker))
        .with_registrations(["x", "y", "z"].map(|topic| {
            Registration::new(topic, "g", |_: Numbered, _| async { Ok(()) })
        }))
        .start()
        .unwrap();

    wait_until(|| broker.consumer_sessions_opened() == 3).await;
    let report = handle.stop(Duration::from_secs(1)).await;

    assert_eq!(report.loops.len(), 3);
    assert!(report.all_stopped());
    assert_eq!(broker.consumer_sessions_closed(), 3);
}

#[tokio::test]
async fn unresponsive_loop_is_reported_and_detached() {
    let broker = InMemoryBroker::new();
    broker.append_raw("slow", Numbered::body(1));

    let handle = ConsumerHost::new(service(&broker))
        .register(Registration::new("slow", "g", |_: Numbered, _cancel: CancellationToken| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }))
        .register(Registration::new("fast", "g", |_: Numbered, _| async { Ok(()) }))
        .start()
        .unwrap();

    wait_until(|| broker.consumer_sessions_opened() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = handle.stop(Duration::from_millis(100)).await;

    assert!(!report.all_stopped());
    let stuck: Vec<_> = report.timed_out().map(|r| r.topic.as_str()).collect();
    assert_eq!(stuck, vec!["slow"]);
    assert!(matches!(report.loops[1].outcome, LoopOutcome::Stopped(_)));
}

#[tokio::test]
async fn dropping_the_handle_signals_stop() {
    let broker = InMemoryBroker::new();
    let handle = ConsumerHost::new(service(&broker))
        .register(Registration::new("t", "g", |_: Numbered, _| async { Ok(()) }))
        .start()
        .unwrap();
    let token = handle.cancellation_token();

    drop(handle);
    assert!(token.is_cancelled());
    wait_until(|| broker.consumer_sessions_closed() == 1).await;
}
