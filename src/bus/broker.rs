//! Broker traits: the narrow seam between the bus and the wire.
//!
//! A [`Broker`] opens sessions. Producer sessions are short-lived (the
//! sender opens one per delivery attempt); consumer sessions live as long
//! as the consumption loop that owns them and are never shared.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::TransportError;

/// A message ready to be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Opaque routing key; the sender mints a fresh UUID per attempt.
    pub key: String,
    /// Serialized JSON body.
    pub value: String,
}

/// Broker-reported persistence of a produced message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PersistenceStatus {
    NotPersisted,
    PossiblyPersisted,
    Persisted,
}

impl fmt::Display for PersistenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceStatus::NotPersisted => write!(f, "NotPersisted"),
            PersistenceStatus::PossiblyPersisted => write!(f, "PossiblyPersisted"),
            PersistenceStatus::Persisted => write!(f, "Persisted"),
        }
    }
}

/// Where a message lives in the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl TopicPartitionOffset {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for TopicPartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [[{}]] @{}", self.topic, self.partition, self.offset)
    }
}

/// Acknowledgement for one produced message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub key: String,
    pub status: PersistenceStatus,
    pub locator: TopicPartitionOffset,
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "message '{}', status '{}' at '{}'",
            self.key, self.status, self.locator
        )
    }
}

/// A message pulled from a consumer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub key: Option<String>,
    pub value: String,
    pub locator: TopicPartitionOffset,
}

/// One producer connection.
#[async_trait]
pub trait ProducerSession: Send + Sync {
    /// Produce a message and wait for the broker's acknowledgement.
    async fn produce(&self, message: OutboundMessage) -> Result<DeliveryReport, TransportError>;
}

/// One consumer connection, subscribed to a single (topic, group).
#[async_trait]
pub trait ConsumerSession: Send {
    /// Wait up to `timeout` for the next message.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>, TransportError>;

    /// Record that everything up to and including `message` is processed.
    async fn commit(&mut self, message: &ConsumedMessage) -> Result<(), TransportError>;

    /// Leave the group and release the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for broker sessions.
///
/// Implementations:
/// - [`InMemoryBroker`](super::InMemoryBroker) for tests and single-process runs
/// - `KafkaBroker` (feature `kafka`) for Apache Kafka via `rdkafka`
#[async_trait]
pub trait Broker: Send + Sync {
    async fn producer(&self) -> Result<Box<dyn ProducerSession>, TransportError>;

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn ConsumerSession>, TransportError>;
}
