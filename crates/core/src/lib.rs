//! Call-event synchronisation core.
//!
//! - `dispatch` serialises call-outcome pipelines through a single worker
//! - `outcome` turns a call id into deal/contact field updates
//! - `token` holds and lazily refreshes the platform OAuth credentials
//! - `config` loads `callsync.toml` plus environment overrides
//!
//! HTTP transport (inbound webhooks, outbound REST) lives in `callsync-server`.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod outcome;
pub mod token;

pub use dispatch::{
    CallProcessor, Completion, DispatchOutcome, DispatchQueue, EnqueueError, QueueItem, QueueStats,
};
pub use domain::call::{CallId, CallOutcome, CallStatRecord, EntityType};
pub use domain::crm::{DealSummary, FieldMapping, FieldSet, OutcomeFieldCodes};
pub use errors::{ApiError, PipelineError};
pub use outcome::{CallOutcomeResolver, CrmGateway, OutcomeReport};
pub use token::{TokenError, TokenPair, TokenProvider, TokenRefresher, TokenStatus, TokenStore};
