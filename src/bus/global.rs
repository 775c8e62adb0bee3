//! Process-wide message bus.
//!
//! Configure once during startup, then publish or consume from anywhere
//! without threading a handle through every call site:
//!
//! ```
//! use std::sync::Arc;
//! use cnpj_messaging::bus::{global, BrokerService, InMemoryBroker};
//! use cnpj_messaging::config::BrokerSettings;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let service = BrokerService::new(
//!     Arc::new(InMemoryBroker::new()),
//!     BrokerSettings::with_servers("localhost:9092"),
//! );
//! global::configure(Arc::new(service)).unwrap();
//!
//! let outcome = global::send_json("cnpj.valid", &serde_json::json!({ "ok": true }))
//!     .await
//!     .unwrap();
//! assert!(outcome.is_delivered());
//! # });
//! ```
//!
//! Components that can take the bus explicitly should: every function here
//! has a counterpart on [`MessageBus`].

use std::sync::{Arc, OnceLock};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::consumer::{ConsumerStatsSnapshot, MessageHandler};
use super::sender::SendOutcome;
use super::service::{MessageBus, MessageBusExt};
use crate::error::{BusError, Result};

/// A bus handle that can be set exactly once.
pub struct BusCell {
    bus: OnceLock<Arc<dyn MessageBus>>,
}

impl Default for BusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl BusCell {
    pub const fn new() -> Self {
        Self {
            bus: OnceLock::new(),
        }
    }

    /// Install `bus`. A second call fails and keeps the first handle.
    pub fn configure(&self, bus: Arc<dyn MessageBus>) -> Result<()> {
        self.bus.set(bus).map_err(|_| BusError::AlreadyConfigured)
    }

    pub fn is_configured(&self) -> bool {
        self.bus.get().is_some()
    }

    pub fn get(&self) -> Result<Arc<dyn MessageBus>> {
        self.bus.get().cloned().ok_or(BusError::NotConfigured)
    }

    pub async fn send(
        &self,
        topic: &str,
        payload: &Value,
        resend_on_error: bool,
    ) -> Result<SendOutcome> {
        self.get()?.send(topic, payload, resend_on_error).await
    }

    pub async fn send_json<T>(&self, topic: &str, payload: &T) -> Result<SendOutcome>
    where
        T: Serialize + ?Sized,
    {
        self.get()?.send_json(topic, payload, true).await
    }

    pub async fn consume(
        &self,
        cancel: CancellationToken,
        topic: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
        resend_on_error: bool,
    ) -> Result<ConsumerStatsSnapshot> {
        self.get()?
            .consume(cancel, topic, group, handler, resend_on_error)
            .await
    }
}

static GLOBAL: BusCell = BusCell::new();

/// Install the process-wide bus.
pub fn configure(bus: Arc<dyn MessageBus>) -> Result<()> {
    GLOBAL.configure(bus)?;
    info!("message bus configured");
    Ok(())
}

pub fn is_configured() -> bool {
    GLOBAL.is_configured()
}

/// The process-wide bus, or [`BusError::NotConfigured`].
pub fn bus() -> Result<Arc<dyn MessageBus>> {
    GLOBAL.get()
}

pub async fn send(topic: &str, payload: &Value, resend_on_error: bool) -> Result<SendOutcome> {
    GLOBAL.send(topic, payload, resend_on_error).await
}

/// Serialize and publish with resend enabled.
pub async fn send_json<T>(topic: &str, payload: &T) -> Result<SendOutcome>
where
    T: Serialize + ?Sized,
{
    GLOBAL.send_json(topic, payload).await
}

pub async fn consume(
    cancel: CancellationToken,
    topic: &str,
    group: &str,
    handler: Arc<dyn MessageHandler>,
    resend_on_error: bool,
) -> Result<ConsumerStatsSnapshot> {
    GLOBAL
        .consume(cancel, topic, group, handler, resend_on_error)
        .await
}
