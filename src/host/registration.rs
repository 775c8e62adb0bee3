use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::bus::{typed_handler, MessageHandler};
use crate::error::{ConfigError, HandlerError};

/// One consumer declared at startup: a (topic, group) pair and the handler
/// its loop dispatches to.
#[derive(Clone)]
pub struct Registration {
    topic: String,
    group: String,
    handler: Arc<dyn MessageHandler>,
    resend_on_error: bool,
}

impl Registration {
    /// Register a strongly typed handler. The payload type is taken from
    /// the handler's first argument.
    pub fn new<T, F, Fut>(topic: impl Into<String>, group: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self::from_handler(topic, group, typed_handler(handler))
    }

    pub fn from_handler(
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            handler,
            resend_on_error: true,
        }
    }

    pub fn with_resend_on_error(mut self, resend_on_error: bool) -> Self {
        self.resend_on_error = resend_on_error;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn payload_type(&self) -> &'static str {
        self.handler.payload_type()
    }

    pub fn handler(&self) -> Arc<dyn MessageHandler> {
        Arc::clone(&self.handler)
    }

    pub fn resend_on_error(&self) -> bool {
        self.resend_on_error
    }

    /// Topic and group must both be non-blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Missing("topic"));
        }
        if self.group.trim().is_empty() {
            return Err(ConfigError::Missing("group"));
        }
        Ok(())
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("payload_type", &self.payload_type())
            .field("resend_on_error", &self.resend_on_error)
            .finish()
    }
}
