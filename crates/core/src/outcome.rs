//! Call-outcome resolution: call id → statistics → owning CRM record(s) →
//! field updates.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::dispatch::CallProcessor;
use crate::domain::call::{CallId, CallOutcome, CallStatRecord, EntityType};
use crate::domain::crm::{DealSummary, FieldMapping, FieldSet};
use crate::errors::{ApiError, PipelineError};

/// Platform operations the resolver needs. Implemented over REST by the
/// server crate.
#[async_trait]
pub trait CrmGateway: Send + Sync {
    async fn call_statistics(&self, call_id: &CallId) -> Result<Vec<CallStatRecord>, ApiError>;
    async fn deals_for_contact(&self, contact_id: &str) -> Result<Vec<DealSummary>, ApiError>;
    async fn update_deal(&self, deal_id: &str, fields: &FieldSet) -> Result<(), ApiError>;
    async fn update_contact(&self, contact_id: &str, fields: &FieldSet) -> Result<(), ApiError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutcomeReport {
    pub updated_deal: Option<String>,
    pub updated_contact: Option<String>,
}

pub struct CallOutcomeResolver {
    gateway: Arc<dyn CrmGateway>,
    fields: FieldMapping,
}

impl CallOutcomeResolver {
    pub fn new(gateway: Arc<dyn CrmGateway>, fields: FieldMapping) -> Self {
        Self { gateway, fields }
    }

    /// Log events carry `correlation_id` so they join the dispatch logs of the
    /// queued item that triggered them.
    pub async fn resolve(
        &self,
        correlation_id: &str,
        call_id: &CallId,
    ) -> Result<OutcomeReport, PipelineError> {
        let records = self.gateway.call_statistics(call_id).await?;
        let record = records.first().ok_or(PipelineError::NotFound)?;
        let outcome = CallOutcome::from_record(record)?;

        let mut report = OutcomeReport::default();
        match &outcome.entity_type {
            EntityType::Deal => {
                self.apply_to_deal(correlation_id, call_id, &outcome.entity_id, &outcome).await?;
                report.updated_deal = Some(outcome.entity_id.clone());
            }
            EntityType::Contact => {
                let deals = self.gateway.deals_for_contact(&outcome.entity_id).await?;
                if let Some(deal_id) = deals.first().and_then(DealSummary::id) {
                    self.apply_to_deal(correlation_id, call_id, &deal_id, &outcome).await?;
                    report.updated_deal = Some(deal_id);
                }

                let fields = self.fields.contact.fields_for(&outcome);
                info!(
                    event_name = "pipeline.contact.update",
                    correlation_id = %correlation_id,
                    call_id = %call_id,
                    contact_id = %outcome.entity_id,
                    "updating contact"
                );
                self.gateway.update_contact(&outcome.entity_id, &fields).await?;
                report.updated_contact = Some(outcome.entity_id.clone());
            }
            EntityType::Other(entity_type) => {
                debug!(
                    event_name = "pipeline.entity.unsupported",
                    correlation_id = %correlation_id,
                    call_id = %call_id,
                    entity_type = %entity_type,
                    entity_id = %outcome.entity_id,
                    "call is linked to an entity type that is not synced; nothing to update"
                );
            }
        }

        Ok(report)
    }

    async fn apply_to_deal(
        &self,
        correlation_id: &str,
        call_id: &CallId,
        deal_id: &str,
        outcome: &CallOutcome,
    ) -> Result<(), ApiError> {
        let fields = self.fields.deal.fields_for(outcome);
        info!(
            event_name = "pipeline.deal.update",
            correlation_id = %correlation_id,
            call_id = %call_id,
            deal_id = %deal_id,
            "updating deal"
        );
        self.gateway.update_deal(deal_id, &fields).await
    }
}

#[async_trait]
impl CallProcessor for CallOutcomeResolver {
    async fn process(&self, correlation_id: &str, call_id: &CallId) -> Result<(), PipelineError> {
        self.resolve(correlation_id, call_id).await.map(|_| ())
    }
}
