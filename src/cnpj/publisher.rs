use std::sync::Arc;

use tracing::info;

use super::events::{CnpjProcessingRequest, CnpjValidation};
use crate::bus::{global, Envelope, MessageBus, MessageBusExt, SendOutcome};
use crate::config::{BrokerSettings, CnpjTopic};
use crate::error::Result;

/// Publishes CNPJ domain events in envelopes to their configured topics.
pub struct CnpjEvents {
    bus: Arc<dyn MessageBus>,
    requests_topic: String,
    valid_topic: String,
    invalid_topic: String,
}

impl CnpjEvents {
    /// Resolve all three topics up front so a missing one fails at startup.
    pub fn new(bus: Arc<dyn MessageBus>, settings: &BrokerSettings) -> Result<Self> {
        Ok(Self {
            bus,
            requests_topic: settings
                .require_topic(CnpjTopic::ProcessingRequests)?
                .to_string(),
            valid_topic: settings.require_topic(CnpjTopic::ValidationValid)?.to_string(),
            invalid_topic: settings
                .require_topic(CnpjTopic::ValidationInvalid)?
                .to_string(),
        })
    }

    /// Publisher on the process-wide bus.
    pub fn from_global(settings: &BrokerSettings) -> Result<Self> {
        Self::new(global::bus()?, settings)
    }

    pub async fn request_processing(&self, request: CnpjProcessingRequest) -> Result<SendOutcome> {
        info!(
            topic = %self.requests_topic,
            request_id = %request.request_id,
            "requesting CNPJ processing"
        );
        let envelope = Envelope::new(self.requests_topic.as_str(), request);
        self.bus.publish(&envelope).await
    }

    /// Route a result to the valid or invalid topic by its status.
    pub async fn report_validation(&self, validation: CnpjValidation) -> Result<SendOutcome> {
        let topic = if validation.is_valid() {
            &self.valid_topic
        } else {
            &self.invalid_topic
        };
        info!(
            topic = %topic,
            request_id = %validation.request_id,
            status = ?validation.status,
            "reporting CNPJ validation"
        );
        let envelope = Envelope::new(topic.as_str(), validation);
        self.bus.publish(&envelope).await
    }
}
