//! Lazily refreshed OAuth credentials for the platform API.
//!
//! The provider hands out the held access token without checking its age; a
//! token that expired server-side keeps being used until the platform rejects
//! it. A refresh happens only while no access token is held.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("no refresh token configured")]
    MissingRefreshToken,
    #[error("oauth token refresh failed: {0}")]
    Refresh(String),
}

#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, TokenError>;
}

#[derive(Debug, Default)]
pub struct TokenStore {
    access_token: Option<SecretString>,
    refresh_token: Option<SecretString>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl TokenStore {
    /// Store holding only the configured refresh token, as at process start.
    pub fn seeded(refresh_token: Option<SecretString>) -> Self {
        Self { access_token: None, refresh_token, refreshed_at: None }
    }

    fn replace(&mut self, pair: TokenPair) {
        self.access_token = Some(pair.access_token);
        self.refresh_token = Some(pair.refresh_token);
        self.refreshed_at = Some(Utc::now());
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub access_token_held: bool,
    pub refresh_token_held: bool,
    pub refreshed_at: Option<String>,
}

pub struct TokenProvider {
    store: Mutex<TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl TokenProvider {
    pub fn new(store: TokenStore, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { store: Mutex::new(store), refresher }
    }

    /// Returns the held access token, refreshing first when none is held.
    ///
    /// The store lock is held across the refresh so two callers can never
    /// rotate the refresh token at the same time.
    pub async fn ensure_valid_token(&self) -> Result<SecretString, TokenError> {
        let mut store = self.store.lock().await;
        if let Some(token) = &store.access_token {
            return Ok(token.clone());
        }

        self.refresh_locked(&mut store).await?;
        store.access_token.clone().ok_or(TokenError::MissingRefreshToken)
    }

    /// Exchanges the held refresh token for a new pair. On failure the held
    /// state is left untouched.
    pub async fn refresh(&self) -> Result<(), TokenError> {
        let mut store = self.store.lock().await;
        self.refresh_locked(&mut store).await
    }

    pub async fn status(&self) -> TokenStatus {
        let store = self.store.lock().await;
        TokenStatus {
            access_token_held: store.access_token.is_some(),
            refresh_token_held: store.refresh_token.is_some(),
            refreshed_at: store.refreshed_at.map(|at| at.to_rfc3339()),
        }
    }

    async fn refresh_locked(&self, store: &mut TokenStore) -> Result<(), TokenError> {
        let result = match &store.refresh_token {
            Some(refresh_token) => self.refresher.refresh(refresh_token).await,
            None => Err(TokenError::MissingRefreshToken),
        };

        match result {
            Ok(pair) => {
                store.replace(pair);
                info!(
                    event_name = "platform.token.refreshed",
                    correlation_id = "token",
                    "access token refreshed"
                );
                Ok(())
            }
            Err(refresh_error) => {
                error!(
                    event_name = "platform.token.refresh_failed",
                    correlation_id = "token",
                    error = %refresh_error,
                    "access token refresh failed; keeping previous token state"
                );
                Err(refresh_error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use secrecy::{ExposeSecret, SecretString};
    use tokio::sync::Mutex;

    use super::{TokenError, TokenPair, TokenProvider, TokenRefresher, TokenStore};

    #[derive(Default)]
    struct ScriptedRefresher {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        results: VecDeque<Result<TokenPair, TokenError>>,
        presented: Vec<String>,
    }

    impl ScriptedRefresher {
        fn with_results(results: Vec<Result<TokenPair, TokenError>>) -> Self {
            Self { state: Mutex::new(ScriptedState { results: results.into(), presented: Vec::new() }) }
        }

        async fn presented(&self) -> Vec<String> {
            self.state.lock().await.presented.clone()
        }
    }

    #[async_trait]
    impl TokenRefresher for ScriptedRefresher {
        async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, TokenError> {
            let mut state = self.state.lock().await;
            state.presented.push(refresh_token.expose_secret().to_owned());
            state.results.pop_front().unwrap_or_else(|| Err(TokenError::Refresh("script exhausted".to_owned())))
        }
    }

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair { access_token: access.into(), refresh_token: refresh.into() }
    }

    fn provider(refresher: Arc<ScriptedRefresher>, seed: Option<&str>) -> TokenProvider {
        TokenProvider::new(TokenStore::seeded(seed.map(SecretString::from)), refresher)
    }

    #[tokio::test]
    async fn first_call_refreshes_once_and_later_calls_reuse_token() {
        let refresher = Arc::new(ScriptedRefresher::with_results(vec![Ok(pair("acc-1", "ref-2"))]));
        let provider = provider(refresher.clone(), Some("ref-1"));

        let first = provider.ensure_valid_token().await.expect("first token");
        let second = provider.ensure_valid_token().await.expect("second token");
        let third = provider.ensure_valid_token().await.expect("third token");

        assert_eq!(first.expose_secret(), "acc-1");
        assert_eq!(second.expose_secret(), "acc-1");
        assert_eq!(third.expose_secret(), "acc-1");
        assert_eq!(refresher.presented().await, vec!["ref-1"]);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_state_and_retries_on_next_call() {
        let refresher = Arc::new(ScriptedRefresher::with_results(vec![
            Err(TokenError::Refresh("invalid_grant".to_owned())),
            Ok(pair("acc-1", "ref-2")),
        ]));
        let provider = provider(refresher.clone(), Some("ref-1"));

        let failed = provider.ensure_valid_token().await;
        assert!(matches!(failed, Err(TokenError::Refresh(ref message)) if message == "invalid_grant"));
        assert!(!provider.status().await.access_token_held);

        let token = provider.ensure_valid_token().await.expect("second attempt succeeds");
        assert_eq!(token.expose_secret(), "acc-1");
        assert_eq!(refresher.presented().await, vec!["ref-1", "ref-1"]);
    }

    #[tokio::test]
    async fn explicit_refresh_rotates_refresh_token() {
        let refresher = Arc::new(ScriptedRefresher::with_results(vec![
            Ok(pair("acc-1", "ref-2")),
            Ok(pair("acc-2", "ref-3")),
        ]));
        let provider = provider(refresher.clone(), Some("ref-1"));

        provider.ensure_valid_token().await.expect("initial token");
        provider.refresh().await.expect("explicit refresh");

        let token = provider.ensure_valid_token().await.expect("rotated token");
        assert_eq!(token.expose_secret(), "acc-2");
        assert_eq!(refresher.presented().await, vec!["ref-1", "ref-2"]);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_calling_endpoint() {
        let refresher = Arc::new(ScriptedRefresher::default());
        let provider = provider(refresher.clone(), None);

        let result = provider.ensure_valid_token().await;

        assert_eq!(result.err(), Some(TokenError::MissingRefreshToken));
        assert!(refresher.presented().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_refresh() {
        let refresher = Arc::new(ScriptedRefresher::with_results(vec![Ok(pair("acc-1", "ref-2"))]));
        let provider = Arc::new(provider(refresher.clone(), Some("ref-1")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.ensure_valid_token().await })
            })
            .collect();
        for handle in handles {
            let token = handle.await.expect("task joins").expect("token available");
            assert_eq!(token.expose_secret(), "acc-1");
        }

        assert_eq!(refresher.presented().await.len(), 1);
    }
}
