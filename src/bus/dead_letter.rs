//! Dead-letter topic naming.

use std::fmt;

/// Which side of the bus gave up on a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureDirection {
    Send,
    Consume,
}

impl fmt::Display for FailureDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureDirection::Send => write!(f, "Send"),
            FailureDirection::Consume => write!(f, "Consume"),
        }
    }
}

/// Destination for payloads that failed on `topic`.
///
/// Not a stored entity: just the `{topic}_{direction}_Fail` convention.
/// The bus only ever publishes to these topics; anything that wants to
/// inspect or replay them subscribes on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeadLetterRoute {
    source: String,
    direction: FailureDirection,
}

impl DeadLetterRoute {
    pub fn new(source: impl Into<String>, direction: FailureDirection) -> Self {
        Self {
            source: source.into(),
            direction,
        }
    }

    pub fn consume(source: impl Into<String>) -> Self {
        Self::new(source, FailureDirection::Consume)
    }

    /// Route for sends that exhausted their retries. See
    /// [`FailureDiagnostic::dead_letter_route`](super::FailureDiagnostic::dead_letter_route).
    pub fn send(source: impl Into<String>) -> Self {
        Self::new(source, FailureDirection::Send)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn direction(&self) -> FailureDirection {
        self.direction
    }

    pub fn topic(&self) -> String {
        format!("{}_{}_Fail", self.source, self.direction)
    }
}

impl fmt::Display for DeadLetterRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_Fail", self.source, self.direction)
    }
}
