//! Apache Kafka broker over `rdkafka`.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, warn};

use super::broker::{
    Broker, ConsumedMessage, ConsumerSession, DeliveryReport, OutboundMessage, PersistenceStatus,
    ProducerSession, TopicPartitionOffset,
};
use crate::config::BrokerSettings;
use crate::error::{ConfigError, TransportError};

/// Kafka-backed [`Broker`].
///
/// Producers are created per session with `bootstrap.servers`,
/// `socket.timeout.ms` and `message.timeout.ms`. Consumers add the group,
/// disable auto-commit and start from the earliest offset when the group
/// has none.
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    servers: String,
    socket_timeout: Duration,
    message_timeout: Duration,
}

impl KafkaBroker {
    pub fn new(settings: &BrokerSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            servers: settings.endpoints().join(","),
            socket_timeout: settings.socket_timeout(),
            message_timeout: settings.message_timeout(),
        })
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.servers)
            .set("socket.timeout.ms", self.socket_timeout.as_millis().to_string());
        config
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn producer(&self) -> Result<Box<dyn ProducerSession>, TransportError> {
        let producer: FutureProducer = self
            .base_config()
            .set("message.timeout.ms", self.message_timeout.as_millis().to_string())
            .create()
            .map_err(|err| TransportError::Unreachable(err.to_string()))?;

        Ok(Box::new(KafkaProducer {
            producer,
            timeout: self.message_timeout,
        }))
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn ConsumerSession>, TransportError> {
        let consumer: StreamConsumer = self
            .base_config()
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("auto.commit.interval.ms", "1000")
            .create()
            .map_err(|err| TransportError::Unreachable(err.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|err| TransportError::Session(err.to_string()))?;
        debug!(topic, group, "kafka consumer subscribed");

        Ok(Box::new(KafkaConsumer { consumer }))
    }
}

struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

#[async_trait]
impl ProducerSession for KafkaProducer {
    async fn produce(&self, message: OutboundMessage) -> Result<DeliveryReport, TransportError> {
        let record = FutureRecord::to(&message.topic)
            .key(message.key.as_str())
            .payload(message.value.as_str());

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => Ok(DeliveryReport {
                key: message.key.clone(),
                status: PersistenceStatus::Persisted,
                locator: TopicPartitionOffset::new(&message.topic, partition, offset),
            }),
            Err((err, _)) => Err(produce_error(err)),
        }
    }
}

fn produce_error(err: KafkaError) -> TransportError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageTimedOut) | Some(RDKafkaErrorCode::RequestTimedOut) => {
            TransportError::Timeout
        }
        Some(RDKafkaErrorCode::AllBrokersDown) | Some(RDKafkaErrorCode::BrokerTransportFailure) => {
            TransportError::Unreachable(err.to_string())
        }
        _ => TransportError::Rejected(err.to_string()),
    }
}

/// Message body as text. Bytes that are not UTF-8 are replaced, and the
/// result reaches the loop as an undecodable body.
fn body_text(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(err) => {
            warn!(error = %err, "message body is not UTF-8");
            String::from_utf8_lossy(payload).into_owned()
        }
    }
}

struct KafkaConsumer {
    consumer: StreamConsumer,
}

#[async_trait]
impl ConsumerSession for KafkaConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>, TransportError> {
        let received = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(received) => received,
            Err(_) => return Ok(None),
        };
        let message = received.map_err(|err| TransportError::Session(err.to_string()))?;

        let value = message.payload().map(body_text).unwrap_or_default();
        let key = message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned());

        Ok(Some(ConsumedMessage {
            key,
            value,
            locator: TopicPartitionOffset::new(
                message.topic(),
                message.partition(),
                message.offset(),
            ),
        }))
    }

    async fn commit(&mut self, message: &ConsumedMessage) -> Result<(), TransportError> {
        let locator = &message.locator;
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &locator.topic,
                locator.partition,
                Offset::Offset(locator.offset + 1),
            )
            .map_err(|err| TransportError::Session(err.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(|err| TransportError::Session(err.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}
