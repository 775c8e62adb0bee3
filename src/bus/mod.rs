//! Message bus - resilient publishing and consumption over a broker
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          global facade (configured once per process)        │
//! │  send() / send_json() / consume()                           │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ Arc<dyn MessageBus>
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BrokerService                          │
//! │  MessageSender: bounded retry + one resend pass             │
//! │  ConsumptionLoop: poll / handle / commit / dead-letter      │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ Arc<dyn Broker>
//!                            ▼
//! ┌──────────────────────────────┐    ┌─────────────────────────┐
//! │       InMemoryBroker         │    │  KafkaBroker            │
//! │  (included, fault injection) │    │  (feature "kafka")      │
//! └──────────────────────────────┘    └─────────────────────────┘
//! ```
//!
//! Payloads travel as JSON, usually wrapped in an [`Envelope`]. A message a
//! handler rejects is republished to `{topic}_Consume_Fail` and its offset
//! is left uncommitted.

mod broker;
mod consumer;
mod dead_letter;
mod envelope;
pub mod global;
mod in_memory_broker;
#[cfg(feature = "kafka")]
mod kafka;
mod sender;
mod service;

pub use broker::{
    Broker, ConsumedMessage, ConsumerSession, DeliveryReport, OutboundMessage, PersistenceStatus,
    ProducerSession, TopicPartitionOffset,
};
pub use consumer::{
    typed_handler, ConsumerStats, ConsumerStatsSnapshot, ConsumptionLoop, DispatchError,
    MessageHandler,
};
pub use dead_letter::{DeadLetterRoute, FailureDirection};
pub use envelope::Envelope;
pub use global::BusCell;
pub use in_memory_broker::{InMemoryBroker, ProduceFault};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use sender::{
    FailureDiagnostic, FailureKind, MessageSender, SendOutcome, SenderStats, SenderStatsSnapshot,
};
pub use service::{BrokerService, MessageBus, MessageBusExt};
