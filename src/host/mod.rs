//! Consumer host - runs the process's consumption loops.
//!
//! Registrations are declared once at startup. [`ConsumerHost::start`]
//! spawns one tokio task per registration, all sharing a single
//! cancellation token; [`HostHandle::stop`] cancels that token and waits
//! for the loops to close their sessions.
//!
//! ```text
//!   ConsumerHost ──start()──► HostHandle
//!       │                        │
//!       ├─ Registration A ──► task: bus.consume(A) ──┐
//!       └─ Registration B ──► task: bus.consume(B) ──┤
//!                                                    │ stop(timeout)
//!                                                    ▼
//!                                               HostReport
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cnpj_messaging::bus::{BrokerService, InMemoryBroker};
//! use cnpj_messaging::config::BrokerSettings;
//! use cnpj_messaging::host::{ConsumerHost, Registration};
//!
//! # let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let bus = Arc::new(BrokerService::new(
//!     Arc::new(InMemoryBroker::new()),
//!     BrokerSettings::with_servers("localhost:9092"),
//! ));
//!
//! let handle = ConsumerHost::new(bus)
//!     .register(Registration::new(
//!         "cnpj.requests",
//!         "validators",
//!         |body: serde_json::Value, _cancel| async move {
//!             println!("received {body}");
//!             Ok(())
//!         },
//!     ))
//!     .start()
//!     .unwrap();
//!
//! let report = handle.stop(Duration::from_secs(5)).await;
//! assert!(report.all_stopped());
//! # });
//! ```

mod consumer_host;
mod registration;

pub use consumer_host::{ConsumerHost, HostHandle, HostReport, LoopOutcome, LoopReport};
pub use registration::Registration;
