use thiserror::Error;

use crate::token::TokenError;

/// Failure talking to the platform REST API. Carries the upstream message so
/// the webhook caller sees what the platform said.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("platform request failed: {0}")]
    Transport(String),
    #[error("platform returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("platform response could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Failure of one call-outcome pipeline. Always local to its queue item.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("No call data found.")]
    NotFound,
    #[error("Missing CRM_ENTITY_ID.")]
    MissingEntity,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("call processing aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::MissingEntity => "missing_entity",
            Self::Api(ApiError::Token(_)) => "token",
            Self::Api(_) => "api",
            Self::Aborted(_) => "aborted",
        }
    }
}
