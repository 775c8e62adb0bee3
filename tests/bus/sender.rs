//! Publishing: bounded retry and the single resend pass.

use cnpj_messaging::bus::{FailureKind, InMemoryBroker, MessageBus, MessageBusExt};
use cnpj_messaging::BrokerSettings;
use serde_json::json;

use crate::support::{service, service_with, settings};

#[tokio::test]
async fn healthy_broker_returns_a_descriptor() {
    let broker = InMemoryBroker::new();
    let bus = service(&broker);

    let outcome = bus
        .send("cnpj.valid", &json!({ "cnpj": "11222333000181" }), true)
        .await
        .unwrap();

    let description = outcome.description();
    assert!(description.contains("cnpj.valid [[0]] @0"));
    assert!(description.contains("Persisted"));
    assert_eq!(broker.len("cnpj.valid"), 1);
}

#[tokio::test]
async fn short_outage_is_absorbed_by_the_bounded_attempts() {
    let broker = InMemoryBroker::new();
    broker.fail_next_produces(2);
    let bus = service(&broker);

    let outcome = bus.send_json("t", &json!({ "n": 1 }), true).await.unwrap();

    assert!(outcome.is_delivered());
    assert_eq!(broker.produce_attempts(), 3);
    assert_eq!(bus.sender_stats().resends, 0);
}

#[tokio::test]
async fn full_outage_runs_exactly_one_resend_pass() {
    let broker = InMemoryBroker::new();
    broker.set_unreachable(true);
    let bus = service(&broker);

    let outcome = bus.send_json("t", &json!({ "n": 1 }), true).await.unwrap();

    let diagnostic = outcome.diagnostic().expect("send should report failure");
    assert_eq!(diagnostic.kind, FailureKind::DeliveryExhausted);
    assert_eq!(diagnostic.attempts, 6);
    assert_eq!(broker.produce_attempts(), 6);

    let stats = bus.sender_stats();
    assert_eq!(stats.resends, 1);
    assert_eq!(stats.exhausted, 1);

    let rendered: serde_json::Value = serde_json::from_str(&outcome.description()).unwrap();
    assert_eq!(rendered["topic"], "t");
}

#[tokio::test]
async fn full_outage_without_resend_stops_after_one_pass() {
    let broker = InMemoryBroker::new();
    broker.set_unreachable(true);
    let bus = service(&broker);

    let outcome = bus.send_json("t", &json!({}), false).await.unwrap();

    assert!(!outcome.is_delivered());
    assert_eq!(broker.produce_attempts(), 3);
    assert_eq!(bus.sender_stats().resends, 0);
}

#[tokio::test]
async fn broker_recovering_during_resend_delivers() {
    let broker = InMemoryBroker::new();
    broker.fail_next_produces(4);
    let bus = service(&broker);

    let outcome = bus.send_json("t", &json!({}), true).await.unwrap();

    assert!(outcome.is_delivered());
    assert_eq!(broker.produce_attempts(), 5);
    assert_eq!(bus.sender_stats().resends, 1);
}

#[tokio::test]
async fn zero_retry_count_still_makes_one_attempt() {
    let broker = InMemoryBroker::new();
    let bus = service_with(
        &broker,
        BrokerSettings {
            default_retry_count: 0,
            ..settings()
        },
    );

    let outcome = bus.send_json("t", &json!({}), false).await.unwrap();
    assert!(outcome.is_delivered());
    assert_eq!(broker.produce_attempts(), 1);
}

#[tokio::test]
async fn every_attempt_uses_a_fresh_key() {
    let broker = InMemoryBroker::new();
    let bus = service(&broker);

    bus.send_json("t", &json!(1), true).await.unwrap();
    bus.send_json("t", &json!(2), true).await.unwrap();

    let keys: Vec<_> = broker.messages("t").into_iter().map(|m| m.key).collect();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
}
