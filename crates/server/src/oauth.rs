use async_trait::async_trait;
use callsync_core::config::PlatformConfig;
use callsync_core::{TokenError, TokenPair, TokenRefresher};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::error;

#[derive(Deserialize)]
struct OAuthTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// `grant_type=refresh_token` exchange against `{domain}/oauth/token/`.
pub struct OAuthRefresher {
    http: Client,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
}

impl OAuthRefresher {
    pub fn new(http: Client, config: &PlatformConfig) -> Self {
        Self {
            http,
            token_url: config.base_url().map(|base_url| format!("{base_url}/oauth/token/")),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, TokenError> {
        let token_url = self
            .token_url
            .as_deref()
            .ok_or_else(|| TokenError::Refresh("platform domain is not configured".to_string()))?;

        let mut query =
            vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token.expose_secret())];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }
        if let Some(client_secret) = &self.client_secret {
            query.push(("client_secret", client_secret.expose_secret()));
        }

        let response = self.http.get(token_url).query(&query).send().await.map_err(|error| {
            error!(
                event_name = "platform.token.request_failed",
                correlation_id = "token",
                error = %error,
                "oauth token refresh request failed"
            );
            TokenError::Refresh(format!("token request failed: {error}"))
        })?;

        let status = response.status();
        let raw = response.text().await.map_err(|error| {
            TokenError::Refresh(format!("failed to read token response: {error}"))
        })?;
        let token = serde_json::from_str::<OAuthTokenResponse>(&raw).ok();

        if !status.is_success() {
            let detail = token
                .as_ref()
                .and_then(|token| token.error_description.clone().or_else(|| token.error.clone()))
                .unwrap_or_else(|| status.to_string());
            return Err(TokenError::Refresh(format!("token endpoint returned {status}: {detail}")));
        }

        let token = token.ok_or_else(|| {
            TokenError::Refresh("failed to decode oauth token response".to_string())
        })?;
        let access_token = match token.access_token.filter(|value| !value.is_empty()) {
            Some(value) => value,
            None => {
                let detail = token
                    .error_description
                    .or(token.error)
                    .unwrap_or_else(|| "no access token in response".to_string());
                return Err(TokenError::Refresh(detail));
            }
        };
        let rotated = match token.refresh_token.filter(|value| !value.is_empty()) {
            Some(value) => SecretString::from(value),
            None => refresh_token.clone(),
        };

        Ok(TokenPair { access_token: SecretString::from(access_token), refresh_token: rotated })
    }
}

#[cfg(test)]
mod tests {
    use callsync_core::config::PlatformConfig;
    use callsync_core::{TokenError, TokenRefresher};
    use reqwest::Client;
    use secrecy::{ExposeSecret, SecretString};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::OAuthRefresher;

    fn refresher(domain: Option<String>) -> OAuthRefresher {
        let config = PlatformConfig {
            domain,
            client_id: Some("local.app".to_owned()),
            client_secret: Some(SecretString::from("shh")),
            ..PlatformConfig::default()
        };
        OAuthRefresher::new(Client::new(), &config)
    }

    #[tokio::test]
    async fn exchanges_refresh_token_for_new_pair() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/token/"))
            .and(query_param("grant_type", "refresh_token"))
            .and(query_param("refresh_token", "ref-1"))
            .and(query_param("client_id", "local.app"))
            .and(query_param("client_secret", "shh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "acc-2",
                "refresh_token": "ref-2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pair = refresher(Some(server.uri()))
            .refresh(&SecretString::from("ref-1"))
            .await
            .expect("refresh succeeds");

        assert_eq!(pair.access_token.expose_secret(), "acc-2");
        assert_eq!(pair.refresh_token.expose_secret(), "ref-2");
    }

    #[tokio::test]
    async fn keeps_presented_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "acc-2"})))
            .mount(&server)
            .await;

        let pair = refresher(Some(server.uri()))
            .refresh(&SecretString::from("ref-1"))
            .await
            .expect("refresh succeeds");

        assert_eq!(pair.refresh_token.expose_secret(), "ref-1");
    }

    #[tokio::test]
    async fn rejected_grant_reports_upstream_description() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/token/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid refresh token"
            })))
            .mount(&server)
            .await;

        let result = refresher(Some(server.uri())).refresh(&SecretString::from("stale")).await;

        assert!(matches!(
            result,
            Err(TokenError::Refresh(ref message)) if message.contains("Invalid refresh token")
        ));
    }

    #[tokio::test]
    async fn missing_domain_fails_without_request() {
        let result = refresher(None).refresh(&SecretString::from("ref-1")).await;

        assert!(matches!(result, Err(TokenError::Refresh(ref message)) if message.contains("domain")));
    }
}
