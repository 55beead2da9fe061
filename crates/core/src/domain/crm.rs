use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::call::{scalar_text, CallOutcome};

/// Row of `crm.deal.list`; only the identifier is consumed.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct DealSummary {
    #[serde(rename = "ID", default)]
    pub id: Option<Value>,
}

impl DealSummary {
    pub fn id(&self) -> Option<String> {
        self.id.as_ref().and_then(scalar_text).filter(|id| !id.is_empty())
    }
}

/// Custom field codes a call outcome is written to on one CRM record type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeFieldCodes {
    pub failure_reason: String,
    pub duration: String,
    pub start_date: String,
}

impl OutcomeFieldCodes {
    pub fn default_deal() -> Self {
        Self {
            failure_reason: "UF_CRM_668BB634B111F".to_string(),
            duration: "UF_CRM_66C2B64134A71".to_string(),
            start_date: "UF_CRM_1733474117".to_string(),
        }
    }

    pub fn default_contact() -> Self {
        Self {
            failure_reason: "UF_CRM_668F763F5D533".to_string(),
            duration: "UF_CRM_66CBE81B02C06".to_string(),
            start_date: "UF_CRM_1733471904291".to_string(),
        }
    }

    /// Absent outcome values are left out so the platform keeps whatever the
    /// record already holds for that field.
    pub fn fields_for(&self, outcome: &CallOutcome) -> FieldSet {
        let mut fields = FieldSet::new();
        let pairs = [
            (&self.failure_reason, &outcome.failure_reason),
            (&self.duration, &outcome.duration),
            (&self.start_date, &outcome.start_date),
        ];
        for (code, value) in pairs {
            if let Some(value) = value {
                fields.insert(code.clone(), value.clone());
            }
        }
        fields
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMapping {
    pub deal: OutcomeFieldCodes,
    pub contact: OutcomeFieldCodes,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            deal: OutcomeFieldCodes::default_deal(),
            contact: OutcomeFieldCodes::default_contact(),
        }
    }
}

pub type FieldSet = BTreeMap<String, String>;
