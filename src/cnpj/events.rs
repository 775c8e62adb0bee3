use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source recorded on requests created by the HTTP API.
pub const API_SOURCE: &str = "Api";

const DEFAULT_INVALID_REASON: &str = "CNPJ_CHECK_DIGIT_INVALID";
const DEFAULT_INVALIDATION_DETAILS: &str =
    "check digits do not match the CNPJ validation algorithm";
const DEFAULT_VALIDATION_STAGE: &str = "FORMAT_VALIDATION";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Lifecycle status of a CNPJ record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Pending,
    Valid,
    Invalid,
    Processing,
    Error,
    Blocked,
    Delete,
}

/// Where a validation result came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    #[default]
    Unknown,
    LocalValidation,
    InternalDatabase,
    PartnerApi,
    All,
}

/// A request to validate and store one CNPJ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CnpjProcessingRequest {
    pub cnpj: String,
    pub name: String,
    pub request_id: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
}

impl CnpjProcessingRequest {
    /// A request from the API with a fresh request id.
    pub fn new(cnpj: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cnpj: cnpj.into(),
            name: name.into(),
            request_id: Uuid::new_v4().to_string(),
            source: API_SOURCE.to_string(),
            timestamp: Utc::now(),
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Result of validating one CNPJ.
///
/// Invalid results carry a reason, details and the stage that failed;
/// valid results leave them empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CnpjValidation {
    pub cnpj: String,
    pub request_id: String,
    pub validation_timestamp: DateTime<Utc>,
    pub name: String,
    pub status: Status,
    pub data_source: DataSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidation_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_stage: Option<String>,
}

impl CnpjValidation {
    pub fn valid(
        cnpj: impl Into<String>,
        name: impl Into<String>,
        data_source: DataSource,
    ) -> Self {
        Self {
            cnpj: cnpj.into(),
            request_id: Uuid::new_v4().to_string(),
            validation_timestamp: Utc::now(),
            name: name.into(),
            status: Status::Valid,
            data_source,
            invalid_reason: None,
            invalidation_details: None,
            validation_stage: None,
        }
    }

    /// An invalid result with the check-digit failure defaults.
    pub fn invalid(
        cnpj: impl Into<String>,
        name: impl Into<String>,
        data_source: DataSource,
    ) -> Self {
        Self {
            status: Status::Invalid,
            invalid_reason: Some(DEFAULT_INVALID_REASON.to_string()),
            invalidation_details: Some(DEFAULT_INVALIDATION_DETAILS.to_string()),
            validation_stage: Some(DEFAULT_VALIDATION_STAGE.to_string()),
            ..Self::valid(cnpj, name, data_source)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, details: impl Into<String>) -> Self {
        self.invalid_reason = Some(reason.into());
        self.invalidation_details = Some(details.into());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.status == Status::Valid
    }
}
