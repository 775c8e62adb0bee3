//! The message bus service: one handle for publishing and consuming.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::broker::Broker;
use super::consumer::{typed_handler, ConsumerStatsSnapshot, ConsumptionLoop, MessageHandler};
use super::envelope::Envelope;
use super::sender::{FailureDiagnostic, MessageSender, SendOutcome, SenderStatsSnapshot};
use crate::config::BrokerSettings;
use crate::error::{BusError, HandlerError, Result};

/// Publish and consume on JSON values.
///
/// Object safe, so it can live behind `Arc<dyn MessageBus>` in the
/// process-wide facade or be injected directly. Typed helpers live on
/// [`MessageBusExt`].
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` to `topic`. Delivery failure is reported in the
    /// outcome, not as an error.
    async fn send(&self, topic: &str, payload: &Value, resend_on_error: bool)
        -> Result<SendOutcome>;

    /// Consume `topic` under `group` until `cancel` fires.
    async fn consume(
        &self,
        cancel: CancellationToken,
        topic: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
        resend_on_error: bool,
    ) -> Result<ConsumerStatsSnapshot>;
}

/// Typed conveniences over any [`MessageBus`].
pub trait MessageBusExt: MessageBus {
    /// Serialize and publish `payload`. A payload that fails to serialize
    /// is reported as a failed outcome without touching the broker.
    fn send_json<'a, T>(
        &'a self,
        topic: &'a str,
        payload: &T,
        resend_on_error: bool,
    ) -> BoxFuture<'a, Result<SendOutcome>>
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_value(payload) {
            Ok(value) => async move { self.send(topic, &value, resend_on_error).await }.boxed(),
            Err(err) => future::ready(Ok(SendOutcome::Failed(FailureDiagnostic::serialization(
                topic, &err,
            ))))
            .boxed(),
        }
    }

    /// Publish an envelope to its own topic.
    fn publish<'a, T>(&'a self, envelope: &'a Envelope<T>) -> BoxFuture<'a, Result<SendOutcome>>
    where
        T: Serialize,
    {
        self.send_json(envelope.topic(), envelope, true)
    }

    /// Consume with a strongly typed handler.
    fn consume_typed<'a, T, F, Fut>(
        &'a self,
        cancel: CancellationToken,
        topic: &'a str,
        group: &'a str,
        handler: F,
    ) -> BoxFuture<'a, Result<ConsumerStatsSnapshot>>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        let handler = typed_handler(handler);
        async move { self.consume(cancel, topic, group, handler, true).await }.boxed()
    }
}

impl<B: MessageBus + ?Sized> MessageBusExt for B {}

/// [`MessageBus`] over a [`Broker`].
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use cnpj_messaging::bus::{BrokerService, InMemoryBroker, MessageBusExt};
/// use cnpj_messaging::config::BrokerSettings;
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// # rt.block_on(async {
/// let broker = InMemoryBroker::new();
/// let service = BrokerService::new(
///     Arc::new(broker.clone()),
///     BrokerSettings::with_servers("localhost:9092"),
/// );
///
/// let outcome = service
///     .send_json("cnpj.valid", &serde_json::json!({ "cnpj": "11222333000181" }), true)
///     .await
///     .unwrap();
/// assert!(outcome.is_delivered());
/// assert_eq!(broker.len("cnpj.valid"), 1);
/// # });
/// ```
pub struct BrokerService {
    broker: Arc<dyn Broker>,
    settings: Arc<BrokerSettings>,
    sender: Arc<MessageSender>,
}

impl BrokerService {
    pub fn new(broker: Arc<dyn Broker>, settings: BrokerSettings) -> Self {
        let settings = Arc::new(settings);
        let sender = Arc::new(MessageSender::new(
            Arc::clone(&broker),
            Arc::clone(&settings),
        ));
        Self {
            broker,
            settings,
            sender,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn sender_stats(&self) -> SenderStatsSnapshot {
        self.sender.stats()
    }

    /// Build a loop without starting it, for callers that want its live
    /// statistics.
    pub fn consumption_loop(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> ConsumptionLoop {
        ConsumptionLoop::new(
            Arc::clone(&self.broker),
            Arc::clone(&self.sender),
            Arc::clone(&self.settings),
            topic,
            group,
            handler,
        )
    }
}

#[async_trait]
impl MessageBus for BrokerService {
    async fn send(
        &self,
        topic: &str,
        payload: &Value,
        resend_on_error: bool,
    ) -> Result<SendOutcome> {
        Ok(self.sender.send_value(topic, payload, resend_on_error).await?)
    }

    async fn consume(
        &self,
        cancel: CancellationToken,
        topic: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
        resend_on_error: bool,
    ) -> Result<ConsumerStatsSnapshot> {
        self.consumption_loop(topic, group, handler)
            .with_resend_on_error(resend_on_error)
            .run(cancel)
            .await
            .map_err(BusError::from)
    }
}
