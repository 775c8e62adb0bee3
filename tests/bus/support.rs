//! Shared fixtures for bus tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cnpj_messaging::bus::{BrokerService, InMemoryBroker};
use cnpj_messaging::BrokerSettings;
use serde::{Deserialize, Serialize};

/// Payload used across consumer tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Numbered {
    pub n: u32,
}

impl Numbered {
    pub fn body(n: u32) -> String {
        format!(r#"{{"n":{n}}}"#)
    }
}

/// Fast settings: 3 attempts, 5 ms between them, 20 ms polls.
pub fn settings() -> BrokerSettings {
    BrokerSettings {
        default_retry_count: 3,
        default_retry_delay_ms: 5,
        poll_timeout_ms: 20,
        ..BrokerSettings::with_servers("memory:9092")
    }
}

pub fn service(broker: &InMemoryBroker) -> Arc<BrokerService> {
    Arc::new(BrokerService::new(Arc::new(broker.clone()), settings()))
}

pub fn service_with(broker: &InMemoryBroker, settings: BrokerSettings) -> Arc<BrokerService> {
    Arc::new(BrokerService::new(Arc::new(broker.clone()), settings))
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
