use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::registration::Registration;
use crate::bus::{global, ConsumerStatsSnapshot, MessageBus};
use crate::error::{BusError, Result};

/// Starts one consumption loop per registration.
pub struct ConsumerHost {
    bus: Arc<dyn MessageBus>,
    registrations: Vec<Registration>,
}

impl ConsumerHost {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            registrations: Vec::new(),
        }
    }

    /// A host on the process-wide bus. Fails if it is not configured yet.
    pub fn from_global() -> Result<Self> {
        Ok(Self::new(global::bus()?))
    }

    pub fn register(mut self, registration: Registration) -> Self {
        self.registrations.push(registration);
        self
    }

    pub fn with_registrations(
        mut self,
        registrations: impl IntoIterator<Item = Registration>,
    ) -> Self {
        self.registrations.extend(registrations);
        self
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Validate every registration, then spawn their loops.
    ///
    /// Nothing is spawned if any registration is invalid. Must be called
    /// from within a tokio runtime.
    pub fn start(self) -> Result<HostHandle> {
        for registration in &self.registrations {
            registration.validate()?;
        }

        let cancel = CancellationToken::new();
        let tasks = self
            .registrations
            .into_iter()
            .map(|registration| {
                let bus = Arc::clone(&self.bus);
                let cancel = cancel.clone();
                let topic = registration.topic().to_string();
                let group = registration.group().to_string();

                info!(
                    topic = %topic,
                    group = %group,
                    payload = registration.payload_type(),
                    "starting consumer"
                );

                let handle = tokio::spawn(async move {
                    bus.consume(
                        cancel,
                        registration.topic(),
                        registration.group(),
                        registration.handler(),
                        registration.resend_on_error(),
                    )
                    .await
                });

                ConsumerTask {
                    topic,
                    group,
                    handle,
                }
            })
            .collect();

        Ok(HostHandle { cancel, tasks })
    }
}

struct ConsumerTask {
    topic: String,
    group: String,
    handle: JoinHandle<Result<ConsumerStatsSnapshot>>,
}

/// How one loop ended.
#[derive(Debug)]
pub enum LoopOutcome {
    Stopped(ConsumerStatsSnapshot),
    Failed(BusError),
    /// Still running when the stop budget ran out; left detached.
    TimedOut,
}

#[derive(Debug)]
pub struct LoopReport {
    pub topic: String,
    pub group: String,
    pub outcome: LoopOutcome,
}

/// Result of [`HostHandle::stop`], one entry per registration in
/// registration order.
#[derive(Debug, Default)]
pub struct HostReport {
    pub loops: Vec<LoopReport>,
}

impl HostReport {
    /// Whether every loop exited cleanly.
    pub fn all_stopped(&self) -> bool {
        self.loops
            .iter()
            .all(|report| matches!(report.outcome, LoopOutcome::Stopped(_)))
    }

    pub fn stats(&self, topic: &str) -> Option<&ConsumerStatsSnapshot> {
        self.loops.iter().find_map(|report| match &report.outcome {
            LoopOutcome::Stopped(stats) if report.topic == topic => Some(stats),
            _ => None,
        })
    }

    pub fn timed_out(&self) -> impl Iterator<Item = &LoopReport> {
        self.loops
            .iter()
            .filter(|report| matches!(report.outcome, LoopOutcome::TimedOut))
    }
}

/// Handle to running consumer loops. Drop or call `stop()` to shut down.
pub struct HostHandle {
    cancel: CancellationToken,
    tasks: Vec<ConsumerTask>,
}

impl HostHandle {
    /// The token shared by every loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal every loop to stop without waiting.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    /// Cancel every loop and wait up to `timeout`, shared across all of
    /// them, for each to exit. Loops that miss the deadline are detached,
    /// not aborted.
    pub async fn stop(mut self, timeout: Duration) -> HostReport {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = HostReport::default();

        for mut task in std::mem::take(&mut self.tasks) {
            let outcome = match tokio::time::timeout_at(deadline, &mut task.handle).await {
                Ok(Ok(Ok(stats))) => LoopOutcome::Stopped(stats),
                Ok(Ok(Err(err))) => {
                    error!(
                        topic = %task.topic,
                        group = %task.group,
                        error = %err,
                        "consumer exited with error"
                    );
                    LoopOutcome::Failed(err)
                }
                Ok(Err(join_err)) => {
                    error!(
                        topic = %task.topic,
                        group = %task.group,
                        error = %join_err,
                        "consumer task failed"
                    );
                    LoopOutcome::Failed(BusError::Task {
                        topic: task.topic.clone(),
                        reason: join_err.to_string(),
                    })
                }
                Err(_) => {
                    warn!(
                        topic = %task.topic,
                        group = %task.group,
                        "consumer did not stop in time; detaching"
                    );
                    LoopOutcome::TimedOut
                }
            };

            report.loops.push(LoopReport {
                topic: task.topic,
                group: task.group,
                outcome,
            });
        }

        info!(loops = report.loops.len(), clean = report.all_stopped(), "consumer host stopped");
        report
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
