//! Error types for the message bus.
//!
//! Each failure class maps to one recovery policy:
//!
//! | Error            | Publish side                 | Consume side                  |
//! |------------------|------------------------------|-------------------------------|
//! | `ConfigError`    | returned before any I/O      | returned before subscribing   |
//! | `TransportError` | retried by the bounded policy| pause, then poll again        |
//! | `HandlerError`   | n/a                          | dead-letter or pause          |
//!
//! Delivery exhaustion is not an error value at all: it is reported as
//! [`SendOutcome::Failed`](crate::bus::SendOutcome::Failed).

use thiserror::Error;

/// A required broker setting is missing or malformed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required broker setting: {0}")]
    Missing(&'static str),

    #[error("invalid broker setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse broker settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The broker could not be reached or refused to take the message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("timed out waiting for broker acknowledgement")]
    Timeout,

    #[error("message for topic {topic} was not persisted")]
    NotPersisted { topic: String },

    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("consumer session error: {0}")]
    Session(String),
}

/// Failure raised by a business handler while processing one message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The message cannot be processed. It is rerouted to the
    /// `{topic}_Consume_Fail` topic and its offset is not committed.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// A dependency of the handler is temporarily unavailable. The loop
    /// pauses for the retry delay and keeps polling.
    #[error("transient handler failure: {0}")]
    Transient(String),
}

impl HandlerError {
    pub fn rejected(reason: impl std::fmt::Display) -> Self {
        HandlerError::Rejected(reason.to_string())
    }

    pub fn transient(reason: impl std::fmt::Display) -> Self {
        HandlerError::Transient(reason.to_string())
    }
}

/// Crate-level error for bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("message bus is not configured; call bus::global::configure during startup")]
    NotConfigured,

    #[error("message bus is already configured")]
    AlreadyConfigured,

    #[error("consumer task for topic {topic} failed: {reason}")]
    Task { topic: String, reason: String },
}

pub type Result<T> = std::result::Result<T, BusError>;
