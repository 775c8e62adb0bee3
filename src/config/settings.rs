use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Name of the section that holds broker settings in an appsettings document.
pub const SECTION_NAME: &str = "Kafka";

pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 45_000;
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 1_000_000;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1_000;

/// Topics the CNPJ service reads or writes, keyed by their setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CnpjTopic {
    ProcessingRequests,
    ValidationValid,
    ValidationInvalid,
}

impl CnpjTopic {
    pub fn setting_name(self) -> &'static str {
        match self {
            CnpjTopic::ProcessingRequests => "TopicCnpjProcessingRequests",
            CnpjTopic::ValidationValid => "TopicCnpjValidationValid",
            CnpjTopic::ValidationInvalid => "TopicCnpjValidationInvalid",
        }
    }
}

/// Process-wide broker configuration.
///
/// Loaded once at startup and shared read-only (behind an `Arc`) by the
/// sender and every consumption loop.
///
/// ## Example
///
/// ```
/// use cnpj_messaging::config::BrokerSettings;
///
/// let settings = BrokerSettings::from_json(r#"{
///     "Kafka": {
///         "BootstrapServers": "broker-1:9092,broker-2:9092",
///         "DefaultRetryCount": 5
///     }
/// }"#).unwrap();
///
/// assert_eq!(settings.endpoints(), vec!["broker-1:9092", "broker-2:9092"]);
/// assert_eq!(settings.default_retry_count, 5);
/// assert_eq!(settings.default_retry_delay_ms, 3000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BrokerSettings {
    /// Comma-separated `host:port` list.
    pub bootstrap_servers: Option<String>,
    pub socket_timeout_ms: u64,
    pub message_timeout_ms: u64,
    /// Attempts per delivery pass.
    pub default_retry_count: u32,
    /// Delay between delivery attempts and after unhandled consume errors.
    pub default_retry_delay_ms: u64,
    /// Upper bound on one poll; also bounds how long a loop takes to notice
    /// cancellation when the broker session does not observe it directly.
    pub poll_timeout_ms: u64,
    #[serde(alias = "GroupCNPJValidade")]
    pub group_cnpj_validation: Option<String>,
    pub topic_cnpj_processing_requests: Option<String>,
    pub topic_cnpj_validation_valid: Option<String>,
    pub topic_cnpj_validation_invalid: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            bootstrap_servers: None,
            socket_timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
            default_retry_count: DEFAULT_RETRY_COUNT,
            default_retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            group_cnpj_validation: None,
            topic_cnpj_processing_requests: None,
            topic_cnpj_validation_valid: None,
            topic_cnpj_validation_invalid: None,
        }
    }
}

impl BrokerSettings {
    /// Settings pointing at the given servers, everything else defaulted.
    pub fn with_servers(servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: Some(servers.into()),
            ..Self::default()
        }
    }

    /// Parse settings from JSON.
    ///
    /// Accepts either the bare section or a full appsettings document
    /// carrying a `"Kafka"` section.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let document: serde_json::Value = serde_json::from_str(json)?;
        let section = match document {
            serde_json::Value::Object(mut map) if map.contains_key(SECTION_NAME) => {
                map.remove(SECTION_NAME).unwrap_or_default()
            }
            other => other,
        };
        Ok(serde_json::from_value(section)?)
    }

    /// Read and parse a JSON settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Read settings from `KAFKA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load `.env` (if present) and then read settings from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded environment file"),
            Err(err) if err.not_found() => {}
            Err(err) => warn!(error = %err, "failed to load environment file"),
        }
        Self::from_env()
    }

    /// Build settings from an arbitrary key lookup. Unset keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bootstrap_servers: text("KAFKA_BOOTSTRAP_SERVERS"),
            socket_timeout_ms: parse_or(
                text("KAFKA_SOCKET_TIMEOUT_MS"),
                "SocketTimeoutMs",
                defaults.socket_timeout_ms,
            )?,
            message_timeout_ms: parse_or(
                text("KAFKA_MESSAGE_TIMEOUT_MS"),
                "MessageTimeoutMs",
                defaults.message_timeout_ms,
            )?,
            default_retry_count: parse_or(
                text("KAFKA_DEFAULT_RETRY_COUNT"),
                "DefaultRetryCount",
                defaults.default_retry_count,
            )?,
            default_retry_delay_ms: parse_or(
                text("KAFKA_DEFAULT_RETRY_DELAY_MS"),
                "DefaultRetryDelayMs",
                defaults.default_retry_delay_ms,
            )?,
            poll_timeout_ms: parse_or(
                text("KAFKA_POLL_TIMEOUT_MS"),
                "PollTimeoutMs",
                defaults.poll_timeout_ms,
            )?,
            group_cnpj_validation: text("KAFKA_GROUP_CNPJ_VALIDATION"),
            topic_cnpj_processing_requests: text("KAFKA_TOPIC_CNPJ_PROCESSING_REQUESTS"),
            topic_cnpj_validation_valid: text("KAFKA_TOPIC_CNPJ_VALIDATION_VALID"),
            topic_cnpj_validation_invalid: text("KAFKA_TOPIC_CNPJ_VALIDATION_INVALID"),
        })
    }

    /// Broker endpoints, trimmed, empty entries dropped.
    pub fn endpoints(&self) -> Vec<&str> {
        self.bootstrap_servers
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Check the settings every broker operation depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints().is_empty() {
            return Err(ConfigError::Missing("BootstrapServers"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "PollTimeoutMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn require_group(&self) -> Result<&str, ConfigError> {
        required(&self.group_cnpj_validation, "GroupCnpjValidation")
    }

    pub fn require_topic(&self, topic: CnpjTopic) -> Result<&str, ConfigError> {
        let value = match topic {
            CnpjTopic::ProcessingRequests => &self.topic_cnpj_processing_requests,
            CnpjTopic::ValidationValid => &self.topic_cnpj_validation_valid,
            CnpjTopic::ValidationInvalid => &self.topic_cnpj_validation_invalid,
        };
        required(value, topic.setting_name())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.default_retry_delay_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_service_defaults() {
        let settings = BrokerSettings::default();
        assert_eq!(settings.socket_timeout_ms, 45_000);
        assert_eq!(settings.message_timeout_ms, 1_000_000);
        assert_eq!(settings.default_retry_count, 3);
        assert_eq!(settings.default_retry_delay_ms, 3_000);
        assert!(settings.bootstrap_servers.is_none());
    }

    #[test]
    fn bare_section_parses() {
        let settings = BrokerSettings::from_json(
            r#"{"BootstrapServers":"localhost:9092","GroupCNPJValidade":"cnpj-group"}"#,
        )
        .unwrap();
        assert_eq!(settings.endpoints(), vec!["localhost:9092"]);
        assert_eq!(settings.require_group().unwrap(), "cnpj-group");
    }

    #[test]
    fn empty_servers_fail_validation() {
        let settings = BrokerSettings::with_servers(" , ");
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Missing("BootstrapServers"))
        ));
        assert!(BrokerSettings::default().validate().is_err());
    }

    #[test]
    fn zero_poll_timeout_is_invalid() {
        let settings = BrokerSettings {
            poll_timeout_ms: 0,
            ..BrokerSettings::with_servers("localhost:9092")
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { name: "PollTimeoutMs", .. })
        ));
    }

    #[test]
    fn lookup_reads_overrides_and_keeps_defaults() {
        let env: HashMap<&str, &str> = [
            ("KAFKA_BOOTSTRAP_SERVERS", "a:9092,b:9092"),
            ("KAFKA_DEFAULT_RETRY_COUNT", "7"),
            ("KAFKA_TOPIC_CNPJ_PROCESSING_REQUESTS", "cnpj.requests"),
            ("KAFKA_GROUP_CNPJ_VALIDATION", "   "),
        ]
        .into_iter()
        .collect();

        let settings =
            BrokerSettings::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.endpoints(), vec!["a:9092", "b:9092"]);
        assert_eq!(settings.default_retry_count, 7);
        assert_eq!(settings.default_retry_delay_ms, DEFAULT_RETRY_DELAY_MS);
        assert_eq!(
            settings.require_topic(CnpjTopic::ProcessingRequests).unwrap(),
            "cnpj.requests"
        );
        assert!(matches!(
            settings.require_group(),
            Err(ConfigError::Missing("GroupCnpjValidation"))
        ));
    }

    #[test]
    fn lookup_rejects_non_numeric_values() {
        let result = BrokerSettings::from_lookup(|key| {
            (key == "KAFKA_DEFAULT_RETRY_DELAY_MS").then(|| "soon".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "DefaultRetryDelayMs", .. })
        ));
    }

    #[test]
    fn missing_topic_names_the_setting() {
        let settings = BrokerSettings::with_servers("localhost:9092");
        let err = settings.require_topic(CnpjTopic::ValidationInvalid).unwrap_err();
        assert!(err.to_string().contains("TopicCnpjValidationInvalid"));
    }
}
