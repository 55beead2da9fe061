use std::sync::Arc;

use axum::Router;
use callsync_core::config::{AppConfig, ConfigError, LoadOptions};
use callsync_core::{CallOutcomeResolver, DispatchQueue, TokenProvider, TokenStore};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::oauth::OAuthRefresher;
use crate::platform::{build_http_client, PlatformClient};
use crate::{health, webhook};

pub struct Application {
    pub config: AppConfig,
    pub tokens: Arc<TokenProvider>,
    pub queue: DispatchQueue,
    pub worker: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl Application {
    /// Webhook ingress plus `/health`, sharing the dispatch queue.
    pub fn router(&self) -> Router {
        webhook::router(self.queue.clone())
            .merge(health::router(self.queue.clone(), self.tokens.clone()))
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Wires the token provider, platform client, resolver and dispatch worker.
/// Missing platform credentials are not an error here; the first call event
/// that needs them fails instead.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let http = build_http_client(&config.platform).map_err(BootstrapError::HttpClient)?;
    let refresher = Arc::new(OAuthRefresher::new(http.clone(), &config.platform));
    let tokens = Arc::new(TokenProvider::new(
        TokenStore::seeded(config.platform.refresh_token.clone()),
        refresher,
    ));
    let gateway = Arc::new(PlatformClient::new(http, &config.platform, tokens.clone()));
    let resolver = Arc::new(CallOutcomeResolver::new(gateway, config.fields.clone()));
    let (queue, worker) = DispatchQueue::spawn(&config.queue, resolver);

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        platform_configured = config.platform.base_url().is_some(),
        refresh_token_configured = config.platform.refresh_token.is_some(),
        queue_capacity = ?config.queue.capacity,
        "dispatch worker and platform client initialized"
    );

    Ok(Application { config, tokens, queue, worker })
}
