//! Wire envelope for domain payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wraps a payload with identity, creation time, and destination topic.
///
/// Envelopes exist only on the wire: they are created at publish time,
/// never mutated, and never persisted. The payload type is carried by the
/// type parameter alone.
///
/// Serialized as:
///
/// ```json
/// { "id": "…", "createdAt": "2024-05-01T12:00:00Z", "topic": "…", "payload": { … } }
/// ```
///
/// ## Example
///
/// ```
/// use cnpj_messaging::bus::Envelope;
///
/// let envelope = Envelope::new("cnpj.requests", "12.345.678/0001-95");
/// assert_eq!(envelope.topic(), "cnpj.requests");
/// assert_eq!(envelope.payload(), &"12.345.678/0001-95");
///
/// let json = serde_json::to_value(&envelope).unwrap();
/// assert!(json.get("createdAt").unwrap().is_string());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    id: Uuid,
    created_at: DateTime<Utc>,
    topic: String,
    payload: T,
}

impl<T> Envelope<T> {
    /// Wrap `payload` for `topic` with a fresh id and the current time.
    pub fn new(topic: impl Into<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            topic: topic.into(),
            payload,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}
