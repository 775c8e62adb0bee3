//! Consumption loop: poll, decode, handle, commit, dead-letter.
//!
//! ```text
//!            ┌──────────────┐
//!  start ──► │  Subscribed  │ ◄── subscribe failed: pause, retry
//!            └──────┬───────┘
//!                   ▼
//!            ┌──────────────┐  cancelled   ┌─────────┐
//!        ┌─► │   Polling    │ ───────────► │ Stopped │ (session closed)
//!        │   └──────┬───────┘              └─────────┘
//!        │          ▼
//!        │   ┌──────────────┐
//!        │   │   Handling   │
//!        │   └──┬─────┬──┬──┘
//!        │  ok  │     │  │ transient / panic / transport
//!        │      ▼     │  ▼
//!        │  commit    │  pause retry delay
//!        │            ▼
//!        │   rejected: dead-letter, no commit
//!        └──────────────────────────────────────
//! ```

use std::any::type_name;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{Broker, ConsumedMessage, ConsumerSession};
use super::dead_letter::DeadLetterRoute;
use super::sender::MessageSender;
use crate::config::BrokerSettings;
use crate::error::{ConfigError, HandlerError};

/// Why a message could not be handed to, or was refused by, its handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("payload is not a valid {type_name}: {source}")]
    Decode {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// A handler with its payload type erased.
///
/// Built by [`typed_handler`]; the payload type is fixed when the handler
/// is created, so nothing is looked up by name at dispatch time.
pub trait MessageHandler: Send + Sync {
    /// Name of the payload type, for logs.
    fn payload_type(&self) -> &'static str;

    fn handle(&self, payload: Value, cancel: CancellationToken)
        -> BoxFuture<'static, Result<(), DispatchError>>;
}

struct TypedHandler<T, F> {
    handler: F,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F, Fut> MessageHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn payload_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn handle(
        &self,
        payload: Value,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<(), DispatchError>> {
        match serde_json::from_value::<T>(payload) {
            Ok(typed) => (self.handler)(typed, cancel)
                .map(|result| result.map_err(DispatchError::Handler))
                .boxed(),
            Err(source) => future::ready(Err(DispatchError::Decode {
                type_name: type_name::<T>(),
                source,
            }))
            .boxed(),
        }
    }
}

/// Bind a strongly typed async handler into a [`MessageHandler`].
///
/// ## Example
///
/// ```
/// use cnpj_messaging::bus::typed_handler;
/// use cnpj_messaging::HandlerError;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Ping { n: u32 }
///
/// let handler = typed_handler(|ping: Ping, _cancel| async move {
///     if ping.n == 0 {
///         return Err(HandlerError::rejected("zero"));
///     }
///     Ok(())
/// });
/// assert!(handler.payload_type().ends_with("Ping"));
/// ```
pub fn typed_handler<T, F, Fut>(handler: F) -> Arc<dyn MessageHandler>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(TypedHandler {
        handler,
        _payload: PhantomData,
    })
}

/// Live counters for one loop.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    polls: AtomicU64,
    handled: AtomicU64,
    rejected: AtomicU64,
    poisoned: AtomicU64,
    failed: AtomicU64,
    transport_errors: AtomicU64,
    dead_lettered: AtomicU64,
    dead_letter_failures: AtomicU64,
}

/// Statistics from a consumption loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    /// Poll cycles completed.
    pub polls: u64,
    /// Messages handled and committed.
    pub handled: u64,
    /// Messages the handler rejected.
    pub rejected: u64,
    /// Messages that were not JSON or did not match the payload type.
    pub poisoned: u64,
    /// Transient handler failures and handler panics.
    pub failed: u64,
    /// Subscribe, poll, and commit failures.
    pub transport_errors: u64,
    pub dead_lettered: u64,
    pub dead_letter_failures: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ConsumerStatsSnapshot {
            polls: load(&self.polls),
            handled: load(&self.handled),
            rejected: load(&self.rejected),
            poisoned: load(&self.poisoned),
            failed: load(&self.failed),
            transport_errors: load(&self.transport_errors),
            dead_lettered: load(&self.dead_lettered),
            dead_letter_failures: load(&self.dead_letter_failures),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// What the loop does after handling one message.
enum Next {
    Poll,
    Pause,
}

/// How a dead-letter publish ended.
enum DeadLetter {
    Delivered,
    Failed,
    Cancelled,
}

/// Consumes one (topic, group) pair until cancelled.
///
/// Handling is strictly sequential: the next poll waits for the current
/// handler. An offset is committed only after its handler returned `Ok`,
/// or after the message was found to be undecodable.
pub struct ConsumptionLoop {
    broker: Arc<dyn Broker>,
    sender: Arc<MessageSender>,
    settings: Arc<BrokerSettings>,
    topic: String,
    group: String,
    handler: Arc<dyn MessageHandler>,
    resend_on_error: bool,
    stats: Arc<ConsumerStats>,
}

impl ConsumptionLoop {
    pub fn new(
        broker: Arc<dyn Broker>,
        sender: Arc<MessageSender>,
        settings: Arc<BrokerSettings>,
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            broker,
            sender,
            settings,
            topic: topic.into(),
            group: group.into(),
            handler,
            resend_on_error: true,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Whether rejected and poison messages go to `{topic}_Consume_Fail`.
    pub fn with_resend_on_error(mut self, resend_on_error: bool) -> Self {
        self.resend_on_error = resend_on_error;
        self
    }

    /// Counters, readable while the loop runs.
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `cancel` fires. Returns the final statistics.
    pub async fn run(
        self,
        cancel: CancellationToken,
    ) -> Result<ConsumerStatsSnapshot, ConfigError> {
        self.settings.validate()?;

        let Some(mut session) = self.open_session(&cancel).await else {
            info!(
                topic = %self.topic,
                group = %self.group,
                "consumer cancelled before subscribing"
            );
            return Ok(self.stats.snapshot());
        };
        info!(
            topic = %self.topic,
            group = %self.group,
            payload = self.handler.payload_type(),
            "consumer subscribed"
        );

        while !cancel.is_cancelled() {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = session.poll(self.settings.poll_timeout()) => polled,
            };
            bump(&self.stats.polls);

            let next = match polled {
                Ok(Some(message)) => self.process(session.as_mut(), message, &cancel).await,
                Ok(None) => Next::Poll,
                Err(err) => {
                    bump(&self.stats.transport_errors);
                    error!(topic = %self.topic, group = %self.group, error = %err, "poll failed");
                    Next::Pause
                }
            };

            if let Next::Pause = next {
                self.pause(&cancel).await;
            }
        }

        if let Err(err) = session.close().await {
            debug!(topic = %self.topic, error = %err, "error closing consumer session");
        }
        let stats = self.stats.snapshot();
        info!(
            topic = %self.topic,
            group = %self.group,
            handled = stats.handled,
            rejected = stats.rejected,
            "consumer stopped"
        );
        Ok(stats)
    }

    async fn open_session(&self, cancel: &CancellationToken) -> Option<Box<dyn ConsumerSession>> {
        while !cancel.is_cancelled() {
            let subscribed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                subscribed = self.broker.subscribe(&self.topic, &self.group) => subscribed,
            };

            match subscribed {
                Ok(session) => return Some(session),
                Err(err) => {
                    bump(&self.stats.transport_errors);
                    error!(
                        topic = %self.topic,
                        group = %self.group,
                        error = %err,
                        "subscribe failed"
                    );
                    self.pause(cancel).await;
                }
            }
        }
        None
    }

    async fn process(
        &self,
        session: &mut dyn ConsumerSession,
        message: ConsumedMessage,
        cancel: &CancellationToken,
    ) -> Next {
        let locator = message.locator.clone();

        let payload = match serde_json::from_str::<Value>(&message.value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(topic = %self.topic, at = %locator, error = %err, "message body is not JSON");
                return self
                    .poison(session, &message, Value::String(message.value.clone()), cancel)
                    .await;
            }
        };

        let dispatched = AssertUnwindSafe(async {
            self.handler
                .handle(payload.clone(), cancel.child_token())
                .await
        })
        .catch_unwind()
        .await;

        match dispatched {
            Ok(Ok(())) => match session.commit(&message).await {
                Ok(()) => {
                    bump(&self.stats.handled);
                    debug!(topic = %self.topic, at = %locator, "message handled");
                    Next::Poll
                }
                Err(err) => {
                    bump(&self.stats.transport_errors);
                    error!(topic = %self.topic, at = %locator, error = %err, "commit failed");
                    Next::Pause
                }
            },
            Ok(Err(DispatchError::Decode { type_name, source })) => {
                warn!(
                    topic = %self.topic,
                    at = %locator,
                    payload = type_name,
                    error = %source,
                    "message does not match payload type"
                );
                self.poison(session, &message, payload, cancel).await
            }
            Ok(Err(DispatchError::Handler(HandlerError::Rejected(reason)))) => {
                bump(&self.stats.rejected);
                warn!(
                    topic = %self.topic,
                    at = %locator,
                    reason = %reason,
                    "handler rejected message"
                );
                if self.resend_on_error {
                    self.dead_letter(&payload, cancel).await;
                }
                Next::Poll
            }
            Ok(Err(DispatchError::Handler(HandlerError::Transient(reason)))) => {
                bump(&self.stats.failed);
                error!(topic = %self.topic, at = %locator, reason = %reason, "handler failed");
                Next::Pause
            }
            Err(panic) => {
                bump(&self.stats.failed);
                error!(
                    topic = %self.topic,
                    at = %locator,
                    panic = panic_message(panic.as_ref()),
                    "handler panicked"
                );
                Next::Pause
            }
        }
    }

    /// Dead-letter an undecodable message and commit past it.
    ///
    /// A dead-letter publish cut short by cancellation leaves the offset
    /// uncommitted, so the next session sees the message again.
    async fn poison(
        &self,
        session: &mut dyn ConsumerSession,
        message: &ConsumedMessage,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Next {
        bump(&self.stats.poisoned);
        if self.resend_on_error {
            if let DeadLetter::Cancelled = self.dead_letter(&payload, cancel).await {
                return Next::Poll;
            }
        }

        match session.commit(message).await {
            Ok(()) => Next::Poll,
            Err(err) => {
                bump(&self.stats.transport_errors);
                error!(topic = %self.topic, at = %message.locator, error = %err, "commit failed");
                Next::Pause
            }
        }
    }

    /// Publish `payload` to `{topic}_Consume_Fail`, raced against `cancel`.
    async fn dead_letter(&self, payload: &Value, cancel: &CancellationToken) -> DeadLetter {
        let route = DeadLetterRoute::consume(&self.topic);
        let target = route.topic();

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                bump(&self.stats.dead_letter_failures);
                warn!(topic = %self.topic, dead_letter = %target, "dead-letter publish cancelled");
                return DeadLetter::Cancelled;
            }
            sent = self.sender.send_value(&target, payload, false) => sent,
        };

        match sent {
            Ok(outcome) if outcome.is_delivered() => {
                bump(&self.stats.dead_lettered);
                info!(topic = %self.topic, dead_letter = %target, "message dead-lettered");
                DeadLetter::Delivered
            }
            Ok(outcome) => {
                bump(&self.stats.dead_letter_failures);
                error!(
                    topic = %self.topic,
                    dead_letter = %target,
                    diagnostic = %outcome,
                    "dead-letter publish failed"
                );
                DeadLetter::Failed
            }
            Err(err) => {
                bump(&self.stats.dead_letter_failures);
                error!(
                    topic = %self.topic,
                    dead_letter = %target,
                    error = %err,
                    "dead-letter publish failed"
                );
                DeadLetter::Failed
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.settings.retry_delay()) => {}
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
