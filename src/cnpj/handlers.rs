use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::events::CnpjProcessingRequest;
use crate::bus::Envelope;
use crate::config::{BrokerSettings, CnpjTopic};
use crate::error::{ConfigError, HandlerError};
use crate::host::Registration;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to store CNPJ {cnpj}: {reason}")]
pub struct SinkError {
    pub cnpj: String,
    pub reason: String,
}

impl SinkError {
    pub fn new(cnpj: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            cnpj: cnpj.into(),
            reason: reason.to_string(),
        }
    }
}

/// Where consumed processing requests are stored.
#[async_trait]
pub trait CnpjRecordSink: Send + Sync {
    async fn add(&self, cnpj: &str, name: &str) -> Result<(), SinkError>;
}

/// Sink that only logs; for running the consumer without a store.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl CnpjRecordSink for LoggingSink {
    async fn add(&self, cnpj: &str, name: &str) -> Result<(), SinkError> {
        info!(cnpj, name, "CNPJ record received");
        Ok(())
    }
}

/// Consumers this service runs at startup.
///
/// Fails fast when the processing-requests topic or the validation group
/// is not configured.
pub fn registrations(
    settings: &BrokerSettings,
    sink: Arc<dyn CnpjRecordSink>,
) -> Result<Vec<Registration>, ConfigError> {
    let topic = settings
        .require_topic(CnpjTopic::ProcessingRequests)?
        .to_string();
    let group = settings.require_group()?.to_string();

    let handler_topic = topic.clone();
    let processing = Registration::new(
        topic,
        group,
        move |envelope: Envelope<CnpjProcessingRequest>, _cancel| {
            let sink = Arc::clone(&sink);
            let topic = handler_topic.clone();
            async move { store_processing_request(&topic, envelope, sink.as_ref()).await }
        },
    );

    Ok(vec![processing])
}

async fn store_processing_request(
    topic: &str,
    envelope: Envelope<CnpjProcessingRequest>,
    sink: &dyn CnpjRecordSink,
) -> Result<(), HandlerError> {
    let request = envelope.payload();
    info!(
        topic,
        envelope_id = %envelope.id(),
        request_id = %request.request_id,
        cnpj = %request.cnpj,
        "consuming processing request"
    );

    sink.add(&request.cnpj, &request.name)
        .await
        .map_err(HandlerError::rejected)
}
