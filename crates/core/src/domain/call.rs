use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PipelineError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    /// Returns `None` for blank identifiers; the ingress treats them as missing.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityType {
    Deal,
    Contact,
    Other(String),
}

impl EntityType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "DEAL" => Self::Deal,
            "CONTACT" => Self::Contact,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Deal => "DEAL",
            Self::Contact => "CONTACT",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `voximplant.statistic.get`. The platform mixes numbers and
/// strings for the same column depending on the account, so every column is
/// kept as raw JSON until [`CallOutcome::from_record`] normalises it.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct CallStatRecord {
    #[serde(rename = "CALL_ID", default)]
    pub call_id: Option<Value>,
    #[serde(rename = "CRM_ENTITY_ID", default)]
    pub crm_entity_id: Option<Value>,
    #[serde(rename = "CRM_ENTITY_TYPE", default)]
    pub crm_entity_type: Option<Value>,
    #[serde(rename = "CALL_FAILED_REASON", default)]
    pub call_failed_reason: Option<Value>,
    #[serde(rename = "CALL_DURATION", default)]
    pub call_duration: Option<Value>,
    #[serde(rename = "CALL_START_DATE", default)]
    pub call_start_date: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallOutcome {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub failure_reason: Option<String>,
    pub duration: Option<String>,
    pub start_date: Option<String>,
}

impl CallOutcome {
    pub fn from_record(record: &CallStatRecord) -> Result<Self, PipelineError> {
        let entity_id = record
            .crm_entity_id
            .as_ref()
            .and_then(scalar_text)
            .filter(|id| !id.is_empty() && id != "0")
            .ok_or(PipelineError::MissingEntity)?;

        let entity_type = record
            .crm_entity_type
            .as_ref()
            .and_then(scalar_text)
            .map(|raw| EntityType::parse(&raw))
            .unwrap_or_else(|| EntityType::Other(String::new()));

        Ok(Self {
            entity_id,
            entity_type,
            failure_reason: record.call_failed_reason.as_ref().and_then(scalar_text),
            duration: record.call_duration.as_ref().and_then(scalar_text),
            start_date: record.call_start_date.as_ref().and_then(scalar_text),
        })
    }
}

/// Strings pass through, numbers and booleans are rendered; null and
/// structured values count as absent.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
