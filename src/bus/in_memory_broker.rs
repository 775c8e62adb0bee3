//! In-memory broker for testing and single-process scenarios.
//!
//! This module provides a thread-safe broker that behaves like a
//! single-partition Kafka cluster, useful for:
//! - Unit and integration testing without a running broker
//! - Exercising retry and dead-letter paths through fault injection
//! - Local development

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::broker::{
    Broker, ConsumedMessage, ConsumerSession, DeliveryReport, OutboundMessage, PersistenceStatus,
    ProducerSession, TopicPartitionOffset,
};
use crate::error::TransportError;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Outcome forced onto the next produce call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProduceFault {
    /// The produce call fails with [`TransportError::Unreachable`].
    Unreachable,
    /// The broker acknowledges with [`PersistenceStatus::NotPersisted`].
    NotPersisted,
}

/// In-memory broker.
///
/// Features:
/// - Thread-safe (clones share the same cluster state)
/// - One append-only log per topic, all on partition 0
/// - Committed offsets tracked per (topic, group); a new session resumes
///   at its group's committed offset, so uncommitted messages are
///   redelivered after a restart just like Kafka
/// - Fault injection for produce and poll
///
/// ## Example
///
/// ```
/// use cnpj_messaging::bus::{Broker, InMemoryBroker, OutboundMessage};
/// use std::time::Duration;
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// # rt.block_on(async {
/// let broker = InMemoryBroker::new();
///
/// let producer = broker.producer().await.unwrap();
/// producer.produce(OutboundMessage {
///     topic: "cnpj.requests".into(),
///     key: "k-1".into(),
///     value: r#"{"cnpj":"11222333000181"}"#.into(),
/// }).await.unwrap();
///
/// let mut consumer = broker.subscribe("cnpj.requests", "validators").await.unwrap();
/// let message = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
/// assert_eq!(message.locator.offset, 0);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    logs: HashMap<String, Vec<StoredMessage>>,
    /// Next offset to read, per (topic, group).
    committed: HashMap<(String, String), i64>,
    /// Committed message offsets in commit order, per (topic, group).
    commit_log: HashMap<(String, String), Vec<i64>>,
    produce_faults: VecDeque<ProduceFault>,
    poll_faults: usize,
    subscribe_faults: usize,
    unreachable: bool,
    produce_attempts: usize,
    producer_sessions: usize,
    consumer_sessions_opened: usize,
    consumer_sessions_closed: usize,
}

struct StoredMessage {
    key: String,
    value: String,
}

impl BrokerState {
    fn append(&mut self, topic: &str, key: String, value: String) -> TopicPartitionOffset {
        let log = self.logs.entry(topic.to_string()).or_default();
        log.push(StoredMessage { key, value });
        TopicPartitionOffset::new(topic, 0, log.len() as i64 - 1)
    }
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        lock(&self.state)
    }

    /// Fail the next `count` produce calls as unreachable.
    pub fn fail_next_produces(&self, count: usize) {
        let mut state = self.state();
        state
            .produce_faults
            .extend(std::iter::repeat(ProduceFault::Unreachable).take(count));
    }

    /// Acknowledge the next `count` produce calls as not persisted.
    pub fn reject_next_produces(&self, count: usize) {
        let mut state = self.state();
        state
            .produce_faults
            .extend(std::iter::repeat(ProduceFault::NotPersisted).take(count));
    }

    /// Take the broker down (or bring it back) for every produce call.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Fail the next `count` polls across all sessions.
    pub fn fail_next_polls(&self, count: usize) {
        self.state().poll_faults += count;
    }

    /// Fail the next `count` subscribe calls as unreachable.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.state().subscribe_faults += count;
    }

    /// Append a raw body to `topic`, bypassing producer sessions and faults.
    pub fn append_raw(&self, topic: &str, value: impl Into<String>) -> TopicPartitionOffset {
        let key = uuid::Uuid::new_v4().to_string();
        self.state().append(topic, key, value.into())
    }

    /// All messages on `topic`, in offset order.
    pub fn messages(&self, topic: &str) -> Vec<ConsumedMessage> {
        let state = self.state();
        state
            .logs
            .get(topic)
            .map(|log| {
                log.iter()
                    .enumerate()
                    .map(|(offset, stored)| ConsumedMessage {
                        key: Some(stored.key.clone()),
                        value: stored.value.clone(),
                        locator: TopicPartitionOffset::new(topic, 0, offset as i64),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bodies of all messages on `topic`, in offset order.
    pub fn bodies(&self, topic: &str) -> Vec<String> {
        self.messages(topic).into_iter().map(|m| m.value).collect()
    }

    /// Number of messages on `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.state().logs.get(topic).map_or(0, Vec::len)
    }

    /// Whether `topic` has no messages.
    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Offsets committed by `group` on `topic`, in commit order.
    pub fn committed_offsets(&self, topic: &str, group: &str) -> Vec<i64> {
        self.state()
            .commit_log
            .get(&(topic.to_string(), group.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Next offset `group` will read from `topic` on a fresh session.
    pub fn committed_position(&self, topic: &str, group: &str) -> Option<i64> {
        self.state()
            .committed
            .get(&(topic.to_string(), group.to_string()))
            .copied()
    }

    /// Total produce calls, successful or not.
    pub fn produce_attempts(&self) -> usize {
        self.state().produce_attempts
    }

    /// Producer sessions opened so far.
    pub fn producer_sessions(&self) -> usize {
        self.state().producer_sessions
    }

    pub fn consumer_sessions_opened(&self) -> usize {
        self.state().consumer_sessions_opened
    }

    pub fn consumer_sessions_closed(&self) -> usize {
        self.state().consumer_sessions_closed
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn producer(&self) -> Result<Box<dyn ProducerSession>, TransportError> {
        self.state().producer_sessions += 1;
        Ok(Box::new(InMemoryProducer {
            state: Arc::clone(&self.state),
        }))
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn ConsumerSession>, TransportError> {
        let position = {
            let mut state = self.state();
            if state.subscribe_faults > 0 {
                state.subscribe_faults -= 1;
                return Err(TransportError::Unreachable(
                    "injected subscribe failure".to_string(),
                ));
            }
            state.consumer_sessions_opened += 1;
            state
                .committed
                .get(&(topic.to_string(), group.to_string()))
                .copied()
                .unwrap_or(0)
        };

        Ok(Box::new(InMemoryConsumer {
            state: Arc::clone(&self.state),
            topic: topic.to_string(),
            group: group.to_string(),
            position,
            closed: false,
        }))
    }
}

struct InMemoryProducer {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl ProducerSession for InMemoryProducer {
    async fn produce(&self, message: OutboundMessage) -> Result<DeliveryReport, TransportError> {
        let mut state = lock(&self.state);
        state.produce_attempts += 1;

        match state.produce_faults.pop_front() {
            Some(ProduceFault::Unreachable) => {
                return Err(TransportError::Unreachable(
                    "injected produce failure".to_string(),
                ))
            }
            Some(ProduceFault::NotPersisted) => {
                return Ok(DeliveryReport {
                    key: message.key,
                    status: PersistenceStatus::NotPersisted,
                    locator: TopicPartitionOffset::new(message.topic, 0, -1),
                })
            }
            None => {}
        }

        if state.unreachable {
            return Err(TransportError::Unreachable(
                "in-memory broker is down".to_string(),
            ));
        }

        let locator = state.append(&message.topic, message.key.clone(), message.value);
        Ok(DeliveryReport {
            key: message.key,
            status: PersistenceStatus::Persisted,
            locator,
        })
    }
}

struct InMemoryConsumer {
    state: Arc<Mutex<BrokerState>>,
    topic: String,
    group: String,
    /// Next offset this session reads, independent of the committed offset.
    position: i64,
    closed: bool,
}

impl InMemoryConsumer {
    fn try_next(&mut self) -> Result<Option<ConsumedMessage>, TransportError> {
        let mut state = lock(&self.state);

        if state.poll_faults > 0 {
            state.poll_faults -= 1;
            return Err(TransportError::Session("injected poll failure".to_string()));
        }

        let next = state
            .logs
            .get(&self.topic)
            .and_then(|log| log.get(self.position as usize))
            .map(|stored| ConsumedMessage {
                key: Some(stored.key.clone()),
                value: stored.value.clone(),
                locator: TopicPartitionOffset::new(&self.topic, 0, self.position),
            });

        if next.is_some() {
            self.position += 1;
        }
        Ok(next)
    }
}

#[async_trait]
impl ConsumerSession for InMemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>, TransportError> {
        if self.closed {
            return Err(TransportError::Session("session is closed".to_string()));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_next()? {
                return Ok(Some(message));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn commit(&mut self, message: &ConsumedMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Session("session is closed".to_string()));
        }

        let key = (self.topic.clone(), self.group.clone());
        let offset = message.locator.offset;
        let mut state = lock(&self.state);

        state.commit_log.entry(key.clone()).or_default().push(offset);
        let next = state.committed.entry(key).or_insert(0);
        *next = (*next).max(offset + 1);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            lock(&self.state).consumer_sessions_closed += 1;
        }
        Ok(())
    }
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
