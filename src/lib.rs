pub mod bus;
pub mod cnpj;
pub mod config;
mod error;
pub mod host;
pub mod telemetry;

pub use bus::{
    BrokerService, Envelope, InMemoryBroker, MessageBus, MessageBusExt, SendOutcome,
};
pub use config::BrokerSettings;
pub use error::{BusError, ConfigError, HandlerError, Result, TransportError};
pub use host::{ConsumerHost, HostHandle, HostReport, Registration};

#[cfg(feature = "kafka")]
pub use bus::KafkaBroker;
