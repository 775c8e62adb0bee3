//! Consumption: commit after success, dead-lettering, cancellation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cnpj_messaging::bus::{typed_handler, ConsumerStatsSnapshot, ConsumptionLoop, InMemoryBroker};
use cnpj_messaging::{BrokerSettings, HandlerError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::support::{service, service_with, settings, wait_until, Numbered};

fn reject_three() -> Arc<dyn cnpj_messaging::bus::MessageHandler> {
    typed_handler(|message: Numbered, _| async move {
        if message.n == 3 {
            return Err(HandlerError::rejected("three is not allowed"));
        }
        Ok(())
    })
}

fn spawn(
    consumption: ConsumptionLoop,
) -> (
    CancellationToken,
    JoinHandle<Result<ConsumerStatsSnapshot, cnpj_messaging::ConfigError>>,
) {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(consumption.run(cancel.clone()));
    (cancel, task)
}

#[tokio::test]
async fn commits_iff_the_handler_succeeds() {
    let broker = InMemoryBroker::new();
    for n in 1..=5 {
        broker.append_raw("numbers", Numbered::body(n));
    }

    let consumption = service(&broker).consumption_loop("numbers", "g", reject_three());
    let stats = consumption.stats();
    let (cancel, task) = spawn(consumption);

    wait_until(|| {
        let s = stats.snapshot();
        s.handled == 4 && s.dead_lettered == 1
    })
    .await;
    cancel.cancel();
    let stats = task.await.unwrap().unwrap();

    assert_eq!(stats.rejected, 1);
    assert_eq!(broker.committed_offsets("numbers", "g"), vec![0, 1, 3, 4]);
    assert_eq!(broker.bodies("numbers_Consume_Fail"), vec![Numbered::body(3)]);
}

#[tokio::test]
async fn rejected_message_is_not_dead_lettered_when_resend_is_off() {
    let broker = InMemoryBroker::new();
    broker.append_raw("numbers", Numbered::body(3));

    let consumption = service(&broker)
        .consumption_loop("numbers", "g", reject_three())
        .with_resend_on_error(false);
    let stats = consumption.stats();
    let (cancel, task) = spawn(consumption);

    wait_until(|| stats.snapshot().rejected == 1).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    assert!(broker.is_empty("numbers_Consume_Fail"));
    assert!(broker.committed_offsets("numbers", "g").is_empty());
}

#[tokio::test]
async fn uncommitted_message_is_redelivered_to_the_next_session() {
    let broker = InMemoryBroker::new();
    broker.append_raw("numbers", Numbered::body(3));
    let bus = service(&broker);

    let first = bus.consumption_loop("numbers", "g", reject_three());
    let first_stats = first.stats();
    let (cancel, task) = spawn(first);
    wait_until(|| first_stats.snapshot().rejected == 1).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    let seen = Arc::new(AtomicU32::new(0));
    let handler = {
        let seen = Arc::clone(&seen);
        typed_handler(move |message: Numbered, _| {
            let seen = Arc::clone(&seen);
            async move {
                seen.store(message.n, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    let second = bus.consumption_loop("numbers", "g", handler);
    let (cancel, task) = spawn(second);
    wait_until(|| seen.load(Ordering::SeqCst) == 3).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(broker.committed_offsets("numbers", "g"), vec![0]);
}

#[tokio::test]
async fn transient_failure_pauses_without_committing() {
    let broker = InMemoryBroker::new();
    broker.append_raw("numbers", Numbered::body(1));
    broker.append_raw("numbers", Numbered::body(2));

    let handler = typed_handler(|message: Numbered, _| async move {
        if message.n == 1 {
            return Err(HandlerError::transient("database unavailable"));
        }
        Ok(())
    });
    let consumption = service(&broker).consumption_loop("numbers", "g", handler);
    let stats = consumption.stats();
    let (cancel, task) = spawn(consumption);

    wait_until(|| stats.snapshot().handled == 1).await;
    cancel.cancel();
    let stats = task.await.unwrap().unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(broker.committed_offsets("numbers", "g"), vec![1]);
}

#[tokio::test]
async fn dead_letter_failure_is_counted_and_the_loop_continues() {
    let broker = InMemoryBroker::new();
    broker.append_raw("numbers", Numbered::body(3));
    broker.append_raw("numbers", Numbered::body(4));
    broker.set_unreachable(true);

    let consumption = service(&broker).consumption_loop("numbers", "g", reject_three());
    let stats = consumption.stats();
    let (cancel, task) = spawn(consumption);

    wait_until(|| stats.snapshot().handled == 1).await;
    cancel.cancel();
    let stats = task.await.unwrap().unwrap();

    assert_eq!(stats.dead_letter_failures, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(broker.committed_offsets("numbers", "g"), vec![1]);
}

#[tokio::test]
async fn cancellation_stops_within_one_poll_timeout() {
    let broker = InMemoryBroker::new();
    let poll_timeout = Duration::from_millis(500);
    let bus = service_with(
        &broker,
        BrokerSettings {
            poll_timeout_ms: poll_timeout.as_millis() as u64,
            ..settings()
        },
    );

    let handler = typed_handler(|_: Numbered, _| async { Ok(()) });
    let (cancel, task) = spawn(bus.consumption_loop("numbers", "g", handler));
    wait_until(|| broker.consumer_sessions_opened() == 1).await;

    let started = Instant::now();
    cancel.cancel();
    tokio::time::timeout(poll_timeout, task)
        .await
        .expect("loop outlived its poll timeout")
        .unwrap()
        .unwrap();

    assert!(started.elapsed() < poll_timeout);
    assert_eq!(broker.consumer_sessions_closed(), 1);
}

#[tokio::test]
async fn handler_sees_cancellation() {
    let broker = InMemoryBroker::new();
    broker.append_raw("numbers", Numbered::body(1));

    let handler = typed_handler(|_: Numbered, cancel: CancellationToken| async move {
        cancel.cancelled().await;
        Err(HandlerError::transient("cancelled mid-message"))
    });
    let consumption = service(&broker).consumption_loop("numbers", "g", handler);
    let stats = consumption.stats();
    let (cancel, task) = spawn(consumption);

    wait_until(|| stats.snapshot().polls >= 1).await;
    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(stats.failed, 1);
    assert!(broker.committed_offsets("numbers", "g").is_empty());
}

fn slow_retries() -> BrokerSettings {
    BrokerSettings {
        default_retry_count: 3,
        default_retry_delay_ms: 400,
        ..settings()
    }
}

#[tokio::test]
async fn cancellation_cuts_a_dead_letter_publish_short() {
    let broker = InMemoryBroker::new();
    broker.append_raw("numbers", Numbered::body(3));
    broker.set_unreachable(true);

    let consumption = service_with(&broker, slow_retries())
        .consumption_loop("numbers", "g", reject_three());
    let stats = consumption.stats();
    let (cancel, task) = spawn(consumption);

    wait_until(|| stats.snapshot().rejected == 1).await;
    let started = Instant::now();
    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_millis(300), task)
        .await
        .expect("loop kept retrying the dead-letter publish")
        .unwrap()
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(stats.dead_letter_failures, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert!(broker.committed_offsets("numbers", "g").is_empty());
}

#[tokio::test]
async fn poison_message_stays_uncommitted_when_its_dead_letter_is_cancelled() {
    let broker = InMemoryBroker::new();
    broker.append_raw("numbers", "not json");
    broker.set_unreachable(true);

    let handler = typed_handler(|_: Numbered, _| async { Ok(()) });
    let consumption =
        service_with(&broker, slow_retries()).consumption_loop("numbers", "g", handler);
    let stats = consumption.stats();
    let (cancel, task) = spawn(consumption);

    wait_until(|| stats.snapshot().poisoned == 1).await;
    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_millis(300), task)
        .await
        .expect("loop kept retrying the dead-letter publish")
        .unwrap()
        .unwrap();

    assert_eq!(stats.dead_letter_failures, 1);
    assert!(broker.committed_offsets("numbers", "g").is_empty());
}

#[tokio::test]
async fn subscribe_failures_are_retried_until_subscribed() {
    let broker = InMemoryBroker::new();
    broker.append_raw("numbers", Numbered::body(1));
    broker.fail_next_subscribes(2);

    let handler = typed_handler(|_: Numbered, _| async { Ok(()) });
    let consumption = service(&broker).consumption_loop("numbers", "g", handler);
    let stats = consumption.stats();
    let (cancel, task) = spawn(consumption);

    wait_until(|| stats.snapshot().handled == 1).await;
    cancel.cancel();
    let stats = task.await.unwrap().unwrap();

    assert_eq!(stats.transport_errors, 2);
    assert_eq!(broker.consumer_sessions_opened(), 1);
    assert_eq!(broker.committed_offsets("numbers", "g"), vec![0]);
}

#[tokio::test]
async fn cancellation_while_resubscribing_stops_the_loop() {
    let broker = InMemoryBroker::new();
    broker.fail_next_subscribes(1_000);

    let handler = typed_handler(|_: Numbered, _| async { Ok(()) });
    let consumption =
        service_with(&broker, slow_retries()).consumption_loop("numbers", "g", handler);
    let stats = consumption.stats();
    let (cancel, task) = spawn(consumption);

    wait_until(|| stats.snapshot().transport_errors >= 1).await;
    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_millis(300), task)
        .await
        .expect("loop kept waiting to resubscribe")
        .unwrap()
        .unwrap();

    assert_eq!(stats.polls, 0);
    assert_eq!(broker.consumer_sessions_opened(), 0);
    assert_eq!(broker.consumer_sessions_closed(), 0);
}
