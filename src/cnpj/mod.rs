//! CNPJ domain events and the consumers this service runs.
//!
//! [`CnpjEvents`] publishes processing requests and validation results;
//! [`registrations`] declares the startup consumers, which hand each
//! processing request to a [`CnpjRecordSink`].

mod events;
mod handlers;
mod publisher;

pub use events::{
    CnpjProcessingRequest, CnpjValidation, DataSource, Priority, Status, API_SOURCE,
};
pub use handlers::{registrations, CnpjRecordSink, LoggingSink, SinkError};
pub use publisher::CnpjEvents;
