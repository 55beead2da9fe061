//! REST client for the platform API (`{domain}/rest/{method}`).
//!
//! Every request asks the token provider for the current access token and
//! passes it as the `auth` query parameter. Failures are logged with whatever
//! the platform returned and surfaced as [`ApiError`]; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callsync_core::config::PlatformConfig;
use callsync_core::{
    ApiError, CallId, CallStatRecord, CrmGateway, DealSummary, FieldSet, TokenProvider,
};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error};

const CALL_STATISTICS: &str = "voximplant.statistic.get";
const DEAL_LIST: &str = "crm.deal.list";
const DEAL_UPDATE: &str = "crm.deal.update.json";
const CONTACT_UPDATE: &str = "crm.contact.update.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
}

impl ApiMethod {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Shared HTTP client; a timeout is applied only when configured.
pub fn build_http_client(config: &PlatformConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();
    if let Some(timeout_secs) = config.timeout_secs {
        builder = builder.timeout(Duration::from_secs(timeout_secs));
    }
    builder.build()
}

pub struct PlatformClient {
    http: Client,
    base_url: Option<String>,
    tokens: Arc<TokenProvider>,
}

impl PlatformClient {
    pub fn new(http: Client, config: &PlatformConfig, tokens: Arc<TokenProvider>) -> Self {
        Self { http, base_url: config.base_url().map(str::to_owned), tokens }
    }

    pub async fn request(
        &self,
        method: ApiMethod,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let token = self.tokens.ensure_valid_token().await?;
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| ApiError::Transport("platform domain is not configured".to_string()))?;
        let url = format!("{base_url}/rest/{}", endpoint.trim_start_matches('/'));

        let mut query: Vec<(&str, &str)> = vec![("auth", token.expose_secret())];
        query.extend(params.iter().map(|(key, value)| (*key, value.as_str())));

        let request = match method {
            ApiMethod::Get => self.http.get(&url).query(&query),
            ApiMethod::Post => {
                let payload = body.cloned().unwrap_or_else(|| json!({}));
                self.http.post(&url).query(&query).json(&payload)
            }
        };

        debug!(
            event_name = "platform.request.sent",
            method = method.as_str(),
            endpoint = %endpoint,
            "sending platform request"
        );

        let response = request.send().await.map_err(|transport_error| {
            error!(
                event_name = "platform.request.transport_failed",
                method = method.as_str(),
                endpoint = %endpoint,
                error = %transport_error,
                "platform request failed"
            );
            ApiError::Transport(transport_error.to_string())
        })?;

        let status = response.status();
        let raw = response.text().await.map_err(|read_error| {
            ApiError::Transport(format!("failed to read platform response: {read_error}"))
        })?;
        let payload = serde_json::from_str::<Value>(&raw).ok();

        let upstream_error = payload.as_ref().and_then(upstream_message);
        if !status.is_success() || upstream_error.is_some() {
            let message = upstream_error.unwrap_or_else(|| status.to_string());
            error!(
                event_name = "platform.request.rejected",
                method = method.as_str(),
                endpoint = %endpoint,
                status = status.as_u16(),
                detail = %raw,
                "platform rejected request"
            );
            return Err(ApiError::Status { status: status.as_u16(), message });
        }

        payload.ok_or_else(|| {
            error!(
                event_name = "platform.request.undecodable",
                method = method.as_str(),
                endpoint = %endpoint,
                detail = %raw,
                "platform response is not JSON"
            );
            ApiError::Decode(format!("{endpoint} returned a non-JSON body"))
        })
    }

    async fn list<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, ApiError> {
        let payload = self.request(ApiMethod::Get, endpoint, params, None).await?;
        result_rows(endpoint, payload)
    }

    async fn update(&self, endpoint: &str, id: &str, fields: &FieldSet) -> Result<(), ApiError> {
        let body = json!({ "fields": fields });
        self.request(ApiMethod::Post, endpoint, &[("ID", id.to_string())], Some(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl CrmGateway for PlatformClient {
    async fn call_statistics(&self, call_id: &CallId) -> Result<Vec<CallStatRecord>, ApiError> {
        self.list(CALL_STATISTICS, &[("FILTER[CALL_ID]", call_id.to_string())]).await
    }

    async fn deals_for_contact(&self, contact_id: &str) -> Result<Vec<DealSummary>, ApiError> {
        self.list(DEAL_LIST, &[("FILTER[CONTACT_ID]", contact_id.to_string())]).await
    }

    async fn update_deal(&self, deal_id: &str, fields: &FieldSet) -> Result<(), ApiError> {
        self.update(DEAL_UPDATE, deal_id, fields).await
    }

    async fn update_contact(&self, contact_id: &str, fields: &FieldSet) -> Result<(), ApiError> {
        self.update(CONTACT_UPDATE, contact_id, fields).await
    }
}

/// `error_description` is the human-readable half of the platform's error
/// envelope; fall back to the bare `error` code.
fn upstream_message(payload: &Value) -> Option<String> {
    ["error_description", "error"]
        .into_iter()
        .filter_map(|key| payload.get(key).and_then(Value::as_str))
        .find(|value| !value.is_empty())
        .map(str::to_owned)
}

fn result_rows<T: DeserializeOwned>(endpoint: &str, payload: Value) -> Result<Vec<T>, ApiError> {
    match payload.get("result") {
        Some(rows @ Value::Array(_)) => serde_json::from_value(rows.clone())
            .map_err(|decode_error| ApiError::Decode(format!("{endpoint}: {decode_error}"))),
        _ => Ok(Vec::new()),
    }
}
