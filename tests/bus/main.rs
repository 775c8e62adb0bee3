//! Message bus integration tests, driven by the in-memory broker.

mod support;
mod sender;
mod consumer;
mod host;
