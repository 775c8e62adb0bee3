//! Publishing with bounded retry and a single resend pass.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::broker::{Broker, DeliveryReport, OutboundMessage, PersistenceStatus};
use super::dead_letter::DeadLetterRoute;
use crate::config::BrokerSettings;
use crate::error::{ConfigError, TransportError};

/// Why a send gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Every bounded attempt, plus the resend pass when enabled, failed.
    DeliveryExhausted,
    /// The payload could not be serialized; nothing was sent.
    Serialization,
}

/// Serializable account of a failed send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDiagnostic {
    pub kind: FailureKind,
    pub topic: String,
    /// Produce attempts made across all passes.
    pub attempts: u32,
    pub error: String,
}

impl FailureDiagnostic {
    pub fn exhausted(topic: &str, attempts: u32, error: &TransportError) -> Self {
        Self {
            kind: FailureKind::DeliveryExhausted,
            topic: topic.to_string(),
            attempts,
            error: error.to_string(),
        }
    }

    pub fn serialization(topic: &str, error: &serde_json::Error) -> Self {
        Self {
            kind: FailureKind::Serialization,
            topic: topic.to_string(),
            attempts: 0,
            error: error.to_string(),
        }
    }

    /// Where a caller that keeps its own failed sends should put them:
    /// `{topic}_Send_Fail`. The sender never publishes there itself.
    pub fn dead_letter_route(&self) -> DeadLetterRoute {
        DeadLetterRoute::send(self.topic.as_str())
    }

    /// JSON rendering handed back to fire-and-forget callers.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.error.clone())
    }
}

/// Result of a send. Transport failures never escape as errors: callers
/// always get one of these and must inspect it to notice a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered(DeliveryReport),
    Failed(FailureDiagnostic),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered(_))
    }

    pub fn report(&self) -> Option<&DeliveryReport> {
        match self {
            SendOutcome::Delivered(report) => Some(report),
            SendOutcome::Failed(_) => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&FailureDiagnostic> {
        match self {
            SendOutcome::Delivered(_) => None,
            SendOutcome::Failed(diagnostic) => Some(diagnostic),
        }
    }

    /// Human-readable delivery descriptor, or the JSON diagnostic.
    pub fn description(&self) -> String {
        match self {
            SendOutcome::Delivered(report) => report.to_string(),
            SendOutcome::Failed(diagnostic) => diagnostic.to_json(),
        }
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Counters for a sender, safe to read while sends are in flight.
#[derive(Debug, Default)]
pub struct SenderStats {
    attempts: AtomicU64,
    delivered: AtomicU64,
    resends: AtomicU64,
    exhausted: AtomicU64,
}

/// Point-in-time copy of [`SenderStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderStatsSnapshot {
    pub attempts: u64,
    pub delivered: u64,
    /// Resend passes started after the bounded attempts ran out.
    pub resends: u64,
    pub exhausted: u64,
}

impl SenderStats {
    pub fn snapshot(&self) -> SenderStatsSnapshot {
        SenderStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            resends: self.resends.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

struct PassFailure {
    attempts: u32,
    last_error: TransportError,
}

/// Sends serialized payloads to the broker.
///
/// Each attempt opens a fresh producer session, so no producer state is
/// shared between concurrent sends.
pub struct MessageSender {
    broker: Arc<dyn Broker>,
    settings: Arc<BrokerSettings>,
    stats: SenderStats,
}

impl MessageSender {
    pub fn new(broker: Arc<dyn Broker>, settings: Arc<BrokerSettings>) -> Self {
        Self {
            broker,
            settings,
            stats: SenderStats::default(),
        }
    }

    pub fn stats(&self) -> SenderStatsSnapshot {
        self.stats.snapshot()
    }

    /// Send a JSON payload to `topic`.
    ///
    /// Runs one pass of up to `default_retry_count` attempts. When that pass
    /// fails and `resend_on_error` is set, waits the retry delay and runs
    /// exactly one more pass with resending disabled. Only a configuration
    /// problem is returned as an error.
    pub async fn send_value(
        &self,
        topic: &str,
        payload: &serde_json::Value,
        resend_on_error: bool,
    ) -> Result<SendOutcome, ConfigError> {
        self.settings.validate()?;

        let body = payload.to_string();
        let mut result = self.deliver(topic, &body).await;

        if let Err(failure) = &result {
            if resend_on_error {
                warn!(
                    topic,
                    attempts = failure.attempts,
                    error = %failure.last_error,
                    "bounded delivery failed; resending once"
                );
                self.stats.resends.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(self.settings.retry_delay()).await;

                let first_attempts = failure.attempts;
                result = self.deliver(topic, &body).await.map_err(|mut resend| {
                    resend.attempts += first_attempts;
                    resend
                });
            }
        }

        match result {
            Ok(report) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(topic, delivery = %report, "message delivered");
                Ok(SendOutcome::Delivered(report))
            }
            Err(failure) => {
                self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                let diagnostic =
                    FailureDiagnostic::exhausted(topic, failure.attempts, &failure.last_error);
                error!(
                    topic,
                    attempts = failure.attempts,
                    error = %failure.last_error,
                    "failed to send message"
                );
                Ok(SendOutcome::Failed(diagnostic))
            }
        }
    }

    /// One pass of the bounded retry policy.
    async fn deliver(&self, topic: &str, body: &str) -> Result<DeliveryReport, PassFailure> {
        let max_attempts = self.settings.default_retry_count.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(topic, body).await {
                Ok(report) => return Ok(report),
                Err(err) if attempt < max_attempts => {
                    warn!(
                        topic,
                        attempt,
                        max_attempts,
                        error = %err,
                        "delivery attempt failed; retrying"
                    );
                    tokio::time::sleep(self.settings.retry_delay()).await;
                }
                Err(err) => {
                    return Err(PassFailure {
                        attempts: attempt,
                        last_error: err,
                    })
                }
            }
        }
    }

    async fn attempt(&self, topic: &str, body: &str) -> Result<DeliveryReport, TransportError> {
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);

        let producer = self.broker.producer().await?;
        let report = producer
            .produce(OutboundMessage {
                topic: topic.to_string(),
                key: Uuid::new_v4().to_string(),
                value: body.to_string(),
            })
            .await?;

        if report.status == PersistenceStatus::NotPersisted {
            return Err(TransportError::NotPersisted {
                topic: topic.to_string(),
            });
        }
        Ok(report)
    }
}
