use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use callsync_core::{DispatchQueue, QueueStats, TokenProvider, TokenStatus};
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    queue: DispatchQueue,
    tokens: Arc<TokenProvider>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub dispatch: HealthCheck,
    pub queue: QueueStats,
    pub token: TokenStatus,
    pub checked_at: String,
}

pub fn router(queue: DispatchQueue, tokens: Arc<TokenProvider>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { queue, tokens })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let dispatch = dispatch_check(&state.queue);
    let ready = dispatch.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "callsync-server runtime initialized".to_string(),
        },
        dispatch,
        queue: state.queue.stats(),
        token: state.tokens.status().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn dispatch_check(queue: &DispatchQueue) -> HealthCheck {
    if queue.is_running() {
        HealthCheck { status: "ready", detail: "dispatch worker is running".to_string() }
    } else {
        HealthCheck { status: "degraded", detail: "dispatch worker has stopped".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{extract::State, http::StatusCode, Json};
    use callsync_core::config::QueueConfig;
    use callsync_core::{
        CallId, CallProcessor, DispatchQueue, PipelineError, TokenError, TokenPair, TokenProvider,
        TokenRefresher, TokenStore,
    };
    use secrecy::SecretString;

    use crate::health::{health, HealthState};

    struct NoopProcessor;

    #[async_trait]
    impl CallProcessor for NoopProcessor {
        async fn process(
            &self,
            _correlation_id: &str,
            _call_id: &CallId,
        ) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    struct UnreachableRefresher;

    #[async_trait]
    impl TokenRefresher for UnreachableRefresher {
        async fn refresh(&self, _refresh_token: &SecretString) -> Result<TokenPair, TokenError> {
            Err(TokenError::Refresh("unreachable".to_string()))
        }
    }

    fn tokens() -> Arc<TokenProvider> {
        Arc::new(TokenProvider::new(
            TokenStore::seeded(Some("ref-seed".into())),
            Arc::new(UnreachableRefresher),
        ))
    }

    #[tokio::test]
    async fn health_returns_ready_while_worker_runs() {
        let (queue, _worker) = DispatchQueue::spawn(&QueueConfig::default(), Arc::new(NoopProcessor));

        let (status, Json(payload)) = health(State(HealthState { queue, tokens: tokens() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.dispatch.status, "ready");
        assert_eq!(payload.queue.pending, 0);
        assert!(!payload.token.access_token_held);
        assert!(payload.token.refresh_token_held);
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_worker_stopped() {
        let (queue, worker) = DispatchQueue::spawn(&QueueConfig::default(), Arc::new(NoopProcessor));
        worker.abort();
        let _ = worker.await;

        let (status, Json(payload)) = health(State(HealthState { queue, tokens: tokens() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.dispatch.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
