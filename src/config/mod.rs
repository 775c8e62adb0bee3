//! Broker configuration.

mod settings;

pub use settings::{
    BrokerSettings, CnpjTopic, DEFAULT_MESSAGE_TIMEOUT_MS, DEFAULT_POLL_TIMEOUT_MS,
    DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS, DEFAULT_SOCKET_TIMEOUT_MS, SECTION_NAME,
};
